//! Webhook signature verification, idempotency, and lifecycle transitions.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use keygate_core::{
    CoreError, ProductCatalog, WebhookAck, WebhookEnvelope, WebhookEvent, WebhookProcessor,
};
use keygate_store::Store;
use keygate_types::{License, LicenseId, LicenseStatus, Plan};
use pretty_assertions::assert_eq;
use sha2::Sha256;
use std::sync::Arc;

const SECRET: &[u8] = b"webhook-test-secret";
const DAY: i64 = 86_400;

fn processor(store: Arc<Store>, secret: Option<&str>) -> WebhookProcessor {
    WebhookProcessor::new(store, ProductCatalog::new(), secret)
}

/// Signs `{id}.{ts}.{body}` the way the provider does.
fn sign(secret: &[u8], id: &str, ts: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(format!("{id}.{ts}.{body}").as_bytes());
    format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
}

fn envelope(id: &str, body: &str, signature_header: String) -> WebhookEnvelope {
    WebhookEnvelope {
        webhook_id: id.to_string(),
        timestamp: "1700000000".to_string(),
        signature_header,
        body: body.to_string(),
    }
}

fn seed_license(store: &Store, email: &str, status: LicenseStatus, expires_at: i64) {
    let now = chrono::Utc::now().timestamp();
    let license = License {
        id: LicenseId::new(),
        email: email.to_string(),
        license_key: format!("monthly-SEED{}", &LicenseId::new().to_string()[..8]),
        plan: Plan::Monthly,
        status,
        created_at: now,
        expires_at,
        last_login: None,
        total_requests: 0,
        payment_provider: Some("dodo".to_string()),
        provider_subscription_id: None,
    };
    store.upsert_license(&license).unwrap();
}

const IGNORED_BODY: &str = r#"{"type":"customer.updated","data":{}}"#;

// ── Signature verification ───────────────────────────────────────

#[test]
fn valid_signature_is_accepted() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));
    let sig = sign(SECRET, "wh_1", "1700000000", IGNORED_BODY);
    p.verify_signature("wh_1", "1700000000", IGNORED_BODY, &sig)
        .unwrap();
}

#[test]
fn tampered_body_is_rejected() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));
    let sig = sign(SECRET, "wh_1", "1700000000", IGNORED_BODY);
    let err = p
        .verify_signature("wh_1", "1700000000", r#"{"type":"tampered"}"#, &sig)
        .unwrap_err();
    assert!(matches!(err, CoreError::Signature(_)));
}

#[test]
fn missing_secret_fails_closed() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, None);
    let sig = sign(SECRET, "wh_1", "1700000000", IGNORED_BODY);
    let err = p
        .verify_signature("wh_1", "1700000000", IGNORED_BODY, &sig)
        .unwrap_err();
    assert!(matches!(err, CoreError::Signature(_)));
}

#[test]
fn base64_and_raw_secret_forms_verify_the_same_delivery() {
    // The same key material configured two ways accepts the same signature.
    let sig = sign(SECRET, "wh_1", "1700000000", IGNORED_BODY);

    let as_raw = processor(
        Arc::new(Store::open_in_memory().unwrap()),
        Some(std::str::from_utf8(SECRET).unwrap()),
    );
    as_raw
        .verify_signature("wh_1", "1700000000", IGNORED_BODY, &sig)
        .unwrap();

    let as_b64 = processor(
        Arc::new(Store::open_in_memory().unwrap()),
        Some(&BASE64.encode(SECRET)),
    );
    as_b64
        .verify_signature("wh_1", "1700000000", IGNORED_BODY, &sig)
        .unwrap();
}

#[test]
fn any_matching_candidate_in_the_header_suffices() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));
    let good = sign(SECRET, "wh_1", "1700000000", IGNORED_BODY);
    let bad = sign(b"rotated-out-secret", "wh_1", "1700000000", IGNORED_BODY);

    let header = format!("{bad} {good}");
    p.verify_signature("wh_1", "1700000000", IGNORED_BODY, &header)
        .unwrap();

    // Unversioned candidates are skipped, not treated as matches.
    let header = format!("v2,AAAA {bad}");
    let err = p
        .verify_signature("wh_1", "1700000000", IGNORED_BODY, &header)
        .unwrap_err();
    assert!(matches!(err, CoreError::Signature(_)));
}

// ── Idempotency ──────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_acknowledges_without_reapplying() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));
    let sig = sign(SECRET, "wh_dup", "1700000000", IGNORED_BODY);

    let first = p.process(&envelope("wh_dup", IGNORED_BODY, sig.clone())).unwrap();
    assert_eq!(first, WebhookAck { duplicate: false });

    let second = p.process(&envelope("wh_dup", IGNORED_BODY, sig)).unwrap();
    assert_eq!(second, WebhookAck { duplicate: true });
}

#[tokio::test]
async fn unsigned_delivery_is_not_claimed_for_dedup() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));

    // A forged attempt must not burn the webhook id.
    assert!(p.process(&envelope("wh_forged", IGNORED_BODY, "v1,AAAA".to_string())).is_err());

    let sig = sign(SECRET, "wh_forged", "1700000000", IGNORED_BODY);
    let ack = p.process(&envelope("wh_forged", IGNORED_BODY, sig)).unwrap();
    assert_eq!(ack, WebhookAck { duplicate: false });
}

// ── Lifecycle events ─────────────────────────────────────────────

#[tokio::test]
async fn success_event_creates_a_license_with_a_structured_key() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    p.apply_event(&WebhookEvent::Success {
        email: "new@example.com".to_string(),
        product_id: Some("prod_yearly".to_string()),
        subscription_id: Some("sub_9".to_string()),
    })
    .await
    .unwrap();

    let now = chrono::Utc::now().timestamp();
    let license = store.license_by_email("new@example.com").unwrap().unwrap();
    assert_eq!(license.plan, Plan::Yearly);
    assert_eq!(license.status, LicenseStatus::Active);
    assert!(license.license_key.starts_with("yearly-"));
    assert_eq!(license.provider_subscription_id.as_deref(), Some("sub_9"));
    assert!((license.expires_at - (now + 365 * DAY)).abs() < 5);
}

#[tokio::test]
async fn renewal_extends_from_the_later_of_expiry_and_now() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    let now = chrono::Utc::now().timestamp();
    let future = now + 10 * DAY;
    seed_license(&store, "renew@example.com", LicenseStatus::Active, future);

    p.apply_event(&WebhookEvent::Success {
        email: "renew@example.com".to_string(),
        product_id: Some("prod_monthly".to_string()),
        subscription_id: None,
    })
    .await
    .unwrap();

    // Early renewal stacks onto the unexpired remainder.
    let license = store.license_by_email("renew@example.com").unwrap().unwrap();
    assert_eq!(license.expires_at, future + 30 * DAY);
}

#[tokio::test]
async fn renewal_of_a_lapsed_license_restarts_from_now() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    let now = chrono::Utc::now().timestamp();
    seed_license(&store, "lapsed@example.com", LicenseStatus::Expired, now - 1_000);

    p.apply_event(&WebhookEvent::Success {
        email: "lapsed@example.com".to_string(),
        product_id: Some("prod_monthly".to_string()),
        subscription_id: None,
    })
    .await
    .unwrap();

    let license = store.license_by_email("lapsed@example.com").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert!((license.expires_at - (now + 30 * DAY)).abs() < 5);
}

#[tokio::test]
async fn failure_event_expires_the_license() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    let now = chrono::Utc::now().timestamp();
    seed_license(&store, "churn@example.com", LicenseStatus::Active, now + 10 * DAY);

    p.apply_event(&WebhookEvent::Failure {
        email: "churn@example.com".to_string(),
    })
    .await
    .unwrap();

    let license = store.license_by_email("churn@example.com").unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);
}

#[tokio::test]
async fn success_without_product_falls_back_to_the_default_plan() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    p.apply_event(&WebhookEvent::Success {
        email: "bare@example.com".to_string(),
        product_id: None,
        subscription_id: Some("sub_bare".to_string()),
    })
    .await
    .unwrap();

    let license = store.license_by_email("bare@example.com").unwrap().unwrap();
    assert_eq!(license.plan, Plan::Monthly);
}

// ── Payload validation ───────────────────────────────────────────

#[tokio::test]
async fn success_event_without_an_email_is_a_validation_error() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));

    let body = r#"{"type":"payment.succeeded","data":{"product_id":"prod_monthly"}}"#;
    let sig = sign(SECRET, "wh_noemail", "1700000000", body);
    let err = p.process(&envelope("wh_noemail", body, sig)).unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn invalid_json_is_a_validation_error() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store, Some(std::str::from_utf8(SECRET).unwrap()));

    let body = "not json";
    let sig = sign(SECRET, "wh_bad", "1700000000", body);
    let err = p.process(&envelope("wh_bad", body, sig)).unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn email_resolves_from_nested_customer_or_top_level_field() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let p = processor(store.clone(), Some(std::str::from_utf8(SECRET).unwrap()));

    let nested = r#"{"type":"payment.failed","data":{"customer":{"email":"nested@example.com"}}}"#;
    let sig = sign(SECRET, "wh_nested", "1700000000", nested);
    p.process(&envelope("wh_nested", nested, sig)).unwrap();

    let flat = r#"{"type":"payment.failed","data":{"email":"flat@example.com"}}"#;
    let sig = sign(SECRET, "wh_flat", "1700000000", flat);
    p.process(&envelope("wh_flat", flat, sig)).unwrap();
}
