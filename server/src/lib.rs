//! Keygate HTTP API.
//!
//! Routes:
//! - `POST /api/auth/validate`: license key in, signed token out
//! - `GET  /api/user/stats`: quota and device usage for the caller
//! - `POST /api/generate/keywords`, `POST /api/generate/categories`:
//!   gated generation: token, device session, quota admit, provider call,
//!   counter bump, ledger append, in that order
//! - `POST /v1/webhooks/dodo`: billing lifecycle events
//!
//! Every failure maps to one JSON shape, `{success: false, error}`, through
//! a single [`IntoResponse`] impl.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use keygate_core::{
    CoreError, DeviceSessionManager, DodoClient, LicenseValidator, ModelClient, ProductCatalog,
    QuotaEnforcer, UsageLedger, WebhookEnvelope, WebhookProcessor,
};
use keygate_store::Store;
use keygate_token::{AuthError, TokenIssuer};
use keygate_types::{License, PlanQuota};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Secrets and upstream endpoints, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub token_secret: String,
    pub device_secret: String,
    /// Unset rejects every webhook delivery.
    pub webhook_secret: Option<String>,
    pub dodo_api_base: String,
    pub dodo_api_key: String,
    pub model_api_base: String,
    pub model_api_key: String,
}

/// Shared handler state: one store, one component of each kind.
pub struct AppState {
    store: Arc<Store>,
    issuer: TokenIssuer,
    validator: LicenseValidator,
    devices: DeviceSessionManager,
    quota: QuotaEnforcer,
    webhooks: WebhookProcessor,
    ledger: UsageLedger,
    model: ModelClient,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<Store>, config: &ServerConfig) -> Self {
        let issuer = TokenIssuer::new(config.token_secret.as_bytes());
        let billing = DodoClient::new(&config.dodo_api_base, &config.dodo_api_key);
        Self {
            validator: LicenseValidator::new(store.clone(), issuer.clone(), billing),
            devices: DeviceSessionManager::new(store.clone(), config.device_secret.as_bytes()),
            quota: QuotaEnforcer::new(store.clone()),
            webhooks: WebhookProcessor::new(
                store.clone(),
                ProductCatalog::new(),
                config.webhook_secret.as_deref(),
            ),
            ledger: UsageLedger::new(store.clone()),
            model: ModelClient::new(&config.model_api_base, &config.model_api_key),
            issuer,
            store,
        }
    }
}

/// Builds the router with all routes mounted.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/validate", post(validate_license))
        .route("/api/user/stats", get(user_stats))
        .route("/api/generate/keywords", post(generate_keywords))
        .route("/api/generate/categories", post(generate_categories))
        .route("/v1/webhooks/dodo", post(dodo_webhook))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Auth(_) | CoreError::Signature(_) => StatusCode::UNAUTHORIZED,
            CoreError::LicenseSuspended
            | CoreError::LicenseExpired { .. }
            | CoreError::LicenseInvalid
            | CoreError::DeviceLimitReached { .. } => StatusCode::FORBIDDEN,
            CoreError::LicenseNotFound => StatusCode::NOT_FOUND,
            CoreError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let mut body = json!({
            "success": false,
            "error": self.0.to_string(),
        });
        if let CoreError::QuotaExceeded { used, limit } = self.0 {
            body["used"] = json!(used);
            body["limit"] = json!(limit);
        }
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(CoreError::Validation(message.into()))
}

// ── Auth plumbing ────────────────────────────────────────────────

/// The caller's identity, resolved from the bearer token.
struct Caller {
    license: License,
    fingerprint: String,
    agent: String,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError(CoreError::Auth(AuthError::Malformed(
                "missing Authorization bearer token".to_string(),
            )))
        })
}

fn device_headers(headers: &HeaderMap) -> Result<(String, String), ApiError> {
    let fingerprint = headers
        .get("x-device-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| bad_request("missing X-Device-ID header"))?;
    let agent = headers
        .get("x-device-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    Ok((fingerprint.to_string(), agent.to_string()))
}

/// Verifies the token and resolves the license record behind it.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = bearer_token(headers)?;
    let claims = state.issuer.verify(token).map_err(CoreError::Auth)?;
    let license = state
        .store
        .license_by_key(&claims.sub)
        .map_err(CoreError::Store)?
        .ok_or(CoreError::LicenseNotFound)?;
    let (fingerprint, agent) = device_headers(headers)?;
    Ok(Caller {
        license,
        fingerprint,
        agent,
    })
}

// ── Handlers ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    license_key: String,
}

async fn validate_license(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: ValidateRequest = serde_json::from_str(&body)
        .map_err(|e| bad_request(format!("invalid request body: {e}")))?;
    if request.license_key.trim().is_empty() {
        return Err(bad_request("license_key is required"));
    }

    let validated = state.validator.validate(request.license_key.trim()).await?;
    info!(plan = %validated.plan, "license validated");

    Ok(Json(json!({
        "success": true,
        "token": validated.token,
        "user": {
            "email": validated.email,
            "plan": validated.plan,
            "quota": validated.quota,
            "expiry_date": validated.expires_at,
        },
    })))
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = authenticate(&state, &headers)?;

    state.devices.get_or_create_session(
        &caller.license.email,
        &caller.license.license_key,
        &caller.fingerprint,
        &caller.agent,
    )?;

    let usage = state.quota.usage(&caller.license.email, caller.license.plan)?;
    let devices = state.devices.active_device_count(&caller.license.email)?;
    let quota = PlanQuota::for_plan(caller.license.plan);

    Ok(Json(json!({
        "success": true,
        "daily_used": usage.used,
        "daily_limit": usage.limit,
        "daily_remaining": usage.remaining(),
        "monthly_limit": quota.monthly_limit,
        "max_batch_size": quota.max_batch_size,
        "device_used": devices,
        "can_use": usage.can_use(),
        "plan": caller.license.plan,
    })))
}

async fn generate_keywords(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    generate(&state, &headers, "keywords", &body).await
}

async fn generate_categories(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    generate(&state, &headers, "categories", &body).await
}

/// The gated path: authenticate, claim a device slot, admit against the
/// quota, call the provider, and only then count the request.
async fn generate(
    state: &AppState,
    headers: &HeaderMap,
    task: &str,
    body: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = authenticate(state, headers)?;

    let session = state.devices.get_or_create_session(
        &caller.license.email,
        &caller.license.license_key,
        &caller.fingerprint,
        &caller.agent,
    )?;

    state.quota.admit(&caller.license.email, caller.license.plan)?;

    // Tolerant body handling: an empty or malformed body becomes an empty
    // input object rather than a rejection.
    let input: serde_json::Value = serde_json::from_str(body).unwrap_or_else(|_| json!({}));

    let result = state.model.generate(task, &input).await?;

    state
        .devices
        .increment_usage(session.id, &caller.license.license_key)?;
    state
        .ledger
        .record(&caller.license.email, &format!("generate_{task}"), 0, 1, None);

    Ok(Json(json!({
        "success": true,
        "result": result,
    })))
}

async fn dodo_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let header = |name: &str| -> Result<String, ApiError> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| bad_request(format!("missing {name} header")))
    };

    let envelope = WebhookEnvelope {
        webhook_id: header("webhook-id")?,
        timestamp: header("webhook-timestamp")?,
        signature_header: header("webhook-signature")?,
        body,
    };

    let ack = state.webhooks.process(&envelope)?;
    let mut response = json!({ "received": true });
    if ack.duplicate {
        response["duplicate"] = json!(true);
    }
    Ok(Json(response))
}
