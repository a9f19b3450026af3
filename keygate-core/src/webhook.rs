//! Webhook ingestion: signature verification, idempotency, and license
//! lifecycle transitions.
//!
//! The provider signs `{webhook_id}.{timestamp}.{raw_body}` with
//! HMAC-SHA256. The signature header carries one or more candidates in the
//! form `v1,<base64 sig>` separated by spaces; acceptance requires the
//! locally computed MAC to match at least one, compared constant-time.
//!
//! The configured secret is tried as standard base64 first and falls back
//! to its raw UTF-8 bytes. An unconfigured secret fails closed: every
//! delivery is rejected.
//!
//! The sender is acknowledged as soon as signature and dedup checks pass;
//! the lifecycle mutation runs as a background task with a bounded retry.
//! Background failures are logged only; the sender already got its 200
//! and will not retry on this path.

use crate::catalog::ProductCatalog;
use crate::error::{CoreError, CoreResult};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use keygate_store::Store;
use keygate_types::Plan;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "dodo";

/// Event types that extend or create an entitlement.
const SUCCESS_EVENTS: &[&str] = &[
    "payment.succeeded",
    "subscription.active",
    "subscription.renewed",
];

/// Event types that revoke an entitlement.
const FAILURE_EVENTS: &[&str] = &[
    "payment.failed",
    "subscription.cancelled",
    "subscription.expired",
    "subscription.failed",
];

/// A raw delivery as received on the wire.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub webhook_id: String,
    pub timestamp: String,
    pub signature_header: String,
    pub body: String,
}

/// Acknowledgment returned to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookAck {
    pub duplicate: bool,
}

/// A verified, parsed lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Payment or renewal succeeded: extend or create the license.
    Success {
        email: String,
        /// Absent on bare renewal events; the default product applies.
        product_id: Option<String>,
        subscription_id: Option<String>,
    },
    /// Payment failed or subscription ended: expire the license.
    Failure { email: String },
    /// Recognized envelope, unhandled type. Logged, no-op.
    Ignored { event_type: String },
}

/// Generates a structured license key: plan-name prefix for support
/// legibility plus a fixed-length random suffix. Uniqueness is backed by
/// the storage constraint, not by this function.
#[must_use]
pub fn generate_license_key(plan: Plan) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(16)
        .collect::<String>()
        .to_uppercase();
    format!("{}-{}", plan.as_str(), suffix)
}

/// Verifies, deduplicates, and applies provider lifecycle events.
#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<Store>,
    catalog: Arc<ProductCatalog>,
    /// Decoded signing secret; `None` rejects every delivery.
    secret: Option<Vec<u8>>,
}

impl WebhookProcessor {
    /// Creates a processor. `secret` is the configured webhook secret,
    /// base64-decoded when possible, otherwise taken as raw bytes.
    #[must_use]
    pub fn new(store: Arc<Store>, catalog: ProductCatalog, secret: Option<&str>) -> Self {
        let secret = match secret {
            Some(raw) => Some(decode_secret(raw)),
            None => {
                warn!("webhook secret not configured; all deliveries will be rejected");
                None
            }
        };
        Self {
            store,
            catalog: Arc::new(catalog),
            secret,
        }
    }

    /// Fast path: verify the signature, claim the webhook id, acknowledge.
    ///
    /// On a fresh id the lifecycle mutation is handed to a background task;
    /// on a duplicate nothing mutates and the ack carries `duplicate`.
    pub fn process(&self, envelope: &WebhookEnvelope) -> CoreResult<WebhookAck> {
        self.verify_signature(
            &envelope.webhook_id,
            &envelope.timestamp,
            &envelope.body,
            &envelope.signature_header,
        )?;

        let event = parse_event(&envelope.body)?;

        let now = chrono::Utc::now().timestamp();
        if !self.store.insert_processed_webhook(&envelope.webhook_id, now)? {
            info!(webhook_id = %envelope.webhook_id, "duplicate webhook delivery");
            return Ok(WebhookAck { duplicate: true });
        }

        let this = self.clone();
        let webhook_id = envelope.webhook_id.clone();
        tokio::spawn(async move {
            this.apply_with_retry(&webhook_id, &event).await;
        });

        Ok(WebhookAck { duplicate: false })
    }

    /// Verifies one or more candidate signatures against the envelope.
    pub fn verify_signature(
        &self,
        webhook_id: &str,
        timestamp: &str,
        body: &str,
        signature_header: &str,
    ) -> CoreResult<()> {
        let Some(secret) = &self.secret else {
            return Err(CoreError::Signature(
                "webhook secret not configured".to_string(),
            ));
        };

        let signed_content = format!("{webhook_id}.{timestamp}.{body}");
        let mut matched = false;
        for candidate in signature_header.split_whitespace() {
            let Some(sig_b64) = candidate.strip_prefix("v1,") else {
                continue;
            };
            let Ok(sig) = BASE64.decode(sig_b64) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(secret)
                .expect("HMAC accepts keys of any length");
            mac.update(signed_content.as_bytes());
            // Constant-time comparison per candidate.
            if mac.verify_slice(&sig).is_ok() {
                matched = true;
            }
        }

        if matched {
            Ok(())
        } else {
            Err(CoreError::Signature(
                "no candidate signature matched".to_string(),
            ))
        }
    }

    /// Applies a lifecycle event to the license table. Public for tests;
    /// the HTTP path reaches it through the background task.
    pub async fn apply_event(&self, event: &WebhookEvent) -> CoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        match event {
            WebhookEvent::Failure { email } => {
                let touched = self.store.expire_license_by_email(email)?;
                info!(touched, "expired licenses for failed payment");
                Ok(())
            }
            WebhookEvent::Success {
                email,
                product_id,
                subscription_id,
            } => {
                let plan = match product_id {
                    Some(id) => self.catalog.plan_for(id)?,
                    None => {
                        // Renewal events sometimes omit product detail.
                        debug!("success event without product id; assuming default plan");
                        self.catalog.default_plan()
                    }
                };
                let outcome = self.store.renew_or_create_license(
                    email,
                    plan,
                    plan.duration_secs(),
                    now,
                    PROVIDER,
                    subscription_id.as_deref(),
                    &|| generate_license_key(plan),
                )?;
                info!(
                    plan = %plan,
                    created = outcome.created,
                    expires_at = outcome.license.expires_at,
                    "applied success event"
                );
                Ok(())
            }
            WebhookEvent::Ignored { event_type } => {
                info!(event_type, "ignoring unrecognized webhook event type");
                Ok(())
            }
        }
    }

    /// Slow path: bounded retry for transient storage errors. Safe to
    /// retry because the webhook id was already claimed; a crash between
    /// claim and apply loses the event, which the sender cannot observe,
    /// so every failure here is logged loudly.
    async fn apply_with_retry(&self, webhook_id: &str, event: &WebhookEvent) {
        const MAX_ATTEMPTS: u32 = 3;
        let mut delay = Duration::from_millis(100);

        for attempt in 1..=MAX_ATTEMPTS {
            match self.apply_event(event).await {
                Ok(()) => return,
                Err(CoreError::Store(e)) if attempt < MAX_ATTEMPTS => {
                    warn!(webhook_id, attempt, error = %e, "webhook apply failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(webhook_id, attempt, error = %e, "webhook apply failed permanently");
                    return;
                }
            }
        }
    }
}

/// Decodes the configured secret: standard base64 first, raw bytes as the
/// documented fallback.
fn decode_secret(raw: &str) -> Vec<u8> {
    match BASE64.decode(raw) {
        Ok(decoded) => decoded,
        Err(_) => {
            debug!("webhook secret is not base64; using raw bytes");
            raw.as_bytes().to_vec()
        }
    }
}

// ── Payload parsing ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: RawData,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    #[serde(default)]
    customer: Option<RawCustomer>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    product_cart: Option<Vec<RawCartItem>>,
    #[serde(default)]
    subscription_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCustomer {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCartItem {
    product_id: Option<String>,
}

/// Parses a raw body into a tagged event, surfacing validation errors
/// instead of substituting defaults for required fields.
pub(crate) fn parse_event(body: &str) -> CoreResult<WebhookEvent> {
    let payload: RawPayload = serde_json::from_str(body)
        .map_err(|e| CoreError::Validation(format!("invalid webhook JSON: {e}")))?;

    let is_success = SUCCESS_EVENTS.contains(&payload.event_type.as_str());
    let is_failure = FAILURE_EVENTS.contains(&payload.event_type.as_str());
    if !is_success && !is_failure {
        return Ok(WebhookEvent::Ignored {
            event_type: payload.event_type,
        });
    }

    let email = payload
        .data
        .customer
        .as_ref()
        .and_then(|c| c.email.clone())
        .or(payload.data.email.clone())
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "{} event missing customer email",
                payload.event_type
            ))
        })?;

    if is_failure {
        return Ok(WebhookEvent::Failure { email });
    }

    let product_id = payload.data.product_id.clone().or_else(|| {
        payload
            .data
            .product_cart
            .as_ref()
            .and_then(|cart| cart.first())
            .and_then(|item| item.product_id.clone())
    });

    Ok(WebhookEvent::Success {
        email,
        product_id,
        subscription_id: payload.data.subscription_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_plan_prefix_and_fixed_length() {
        let key = generate_license_key(Plan::Monthly);
        assert!(key.starts_with("monthly-"));
        assert_eq!(key.len(), "monthly-".len() + 16);
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(
            generate_license_key(Plan::Yearly),
            generate_license_key(Plan::Yearly)
        );
    }

    #[test]
    fn secret_decodes_base64_or_falls_back_to_raw() {
        assert_eq!(decode_secret(BASE64.encode(b"hello").as_str()), b"hello");
        // Not valid base64: used verbatim.
        assert_eq!(decode_secret("whsec_!!"), b"whsec_!!");
    }
}
