//! Billing-provider client.
//!
//! The provider is consulted exactly once per unseen license key: it either
//! vouches for the key (returning plan and customer email) or rejects it.
//! Only the interface is owned here; provider internals are out of scope.

use crate::error::{CoreError, CoreResult};
use keygate_types::Plan;
use serde::Deserialize;
use tracing::debug;

/// Provider-side metadata for a verified license key.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingVerification {
    pub plan: Plan,
    pub email: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(flatten)]
    verification: Option<BillingVerification>,
}

/// HTTP client for the Dodo Payments license API.
#[derive(Clone)]
pub struct DodoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DodoClient {
    /// Creates a client against `base_url` (no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Asks the provider to verify `license_key`.
    ///
    /// Returns `Ok(None)` when the provider rejects the key (not an error:
    /// the caller maps this to `LicenseInvalid`). Transport and non-success
    /// responses surface as [`CoreError::Upstream`].
    pub async fn verify_license(&self, license_key: &str) -> CoreResult<Option<BillingVerification>> {
        let url = format!("{}/v1/licenses/validate", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "license_key": license_key }))
            .send()
            .await
            .map_err(|e| CoreError::Upstream(format!("billing request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CoreError::Upstream(format!(
                "billing provider returned {}",
                response.status()
            )));
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Upstream(format!("billing response malformed: {e}")))?;

        if !body.valid {
            debug!("billing provider rejected license key");
            return Ok(None);
        }
        match body.verification {
            Some(v) => Ok(Some(v)),
            None => Err(CoreError::Upstream(
                "billing provider accepted key without metadata".to_string(),
            )),
        }
    }
}
