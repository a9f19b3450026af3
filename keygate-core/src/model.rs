//! Model-provider client for the gated generation endpoints.
//!
//! Only the interface is owned here. The provider receives the task name
//! and the client-supplied input and returns an opaque JSON result that is
//! relayed to the caller unmodified.

use crate::error::{CoreError, CoreResult};

/// HTTP client for the upstream generation provider.
#[derive(Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ModelClient {
    /// Creates a client against `base_url` (no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Runs one generation task and returns the provider's JSON result.
    pub async fn generate(
        &self,
        task: &str,
        input: &serde_json::Value,
    ) -> CoreResult<serde_json::Value> {
        let url = format!("{}/v1/generate", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "task": task, "input": input }))
            .send()
            .await
            .map_err(|e| CoreError::Upstream(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Upstream(format!(
                "model provider returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::Upstream(format!("model response malformed: {e}")))
    }
}
