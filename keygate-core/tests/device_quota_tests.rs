//! Device session gating, quota aggregation, and the usage ledger.

use keygate_core::{
    CoreError, DeviceSessionManager, MAX_DEVICES_PER_LICENSE, QuotaEnforcer, UsageLedger,
};
use keygate_store::Store;
use keygate_types::{License, LicenseId, LicenseStatus, Plan, PlanQuota};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const DEVICE_SECRET: &[u8] = b"device-test-secret";
const USER: &str = "user@example.com";
const KEY: &str = "monthly-TESTKEY000000000";

fn manager(store: Arc<Store>) -> DeviceSessionManager {
    DeviceSessionManager::new(store, DEVICE_SECRET)
}

fn seed_license(store: &Store) {
    let now = chrono::Utc::now().timestamp();
    let license = License {
        id: LicenseId::new(),
        email: USER.to_string(),
        license_key: KEY.to_string(),
        plan: Plan::Monthly,
        status: LicenseStatus::Active,
        created_at: now,
        expires_at: now + 86_400,
        last_login: None,
        total_requests: 0,
        payment_provider: None,
        provider_subscription_id: None,
    };
    store.upsert_license(&license).unwrap();
}

// ── Device hashing ───────────────────────────────────────────────

#[test]
fn device_hash_is_deterministic_and_account_bound() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let m = manager(store);

    let a = m.device_hash("fp-1", "firefox", "alice@example.com");
    let b = m.device_hash("fp-1", "firefox", "alice@example.com");
    assert_eq!(a, b);

    // The same fingerprint on another account hashes differently.
    let other = m.device_hash("fp-1", "firefox", "bob@example.com");
    assert_ne!(a, other);
}

#[test]
fn device_hash_depends_on_the_server_secret() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let m1 = DeviceSessionManager::new(store.clone(), b"secret-one".to_vec());
    let m2 = DeviceSessionManager::new(store, b"secret-two".to_vec());
    assert_ne!(
        m1.device_hash("fp-1", "firefox", USER),
        m2.device_hash("fp-1", "firefox", USER)
    );
}

// ── Device cap ───────────────────────────────────────────────────

#[test]
fn a_new_device_beyond_the_cap_is_rejected() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let m = manager(store);

    m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    m.get_or_create_session(USER, KEY, "fp-2", "chrome").unwrap();

    let err = m
        .get_or_create_session(USER, KEY, "fp-3", "safari")
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::DeviceLimitReached { max_devices } if max_devices == MAX_DEVICES_PER_LICENSE
    ));
}

#[test]
fn a_known_device_is_readmitted_at_the_cap() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let m = manager(store);

    let first = m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    m.get_or_create_session(USER, KEY, "fp-2", "chrome").unwrap();

    // Revisiting does not consume a third slot.
    let again = m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(m.active_device_count(USER).unwrap(), 2);
}

#[test]
fn the_cap_is_per_account() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let m = manager(store);

    m.get_or_create_session("a@example.com", KEY, "fp-1", "firefox").unwrap();
    m.get_or_create_session("a@example.com", KEY, "fp-2", "firefox").unwrap();

    // A different account still has both slots free.
    m.get_or_create_session("b@example.com", KEY, "fp-1", "firefox").unwrap();
}

// ── Quota aggregation ────────────────────────────────────────────

#[test]
fn daily_usage_sums_across_the_accounts_devices() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    seed_license(&store);
    let m = manager(store.clone());
    let quota = QuotaEnforcer::new(store);

    let s1 = m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    let s2 = m.get_or_create_session(USER, KEY, "fp-2", "chrome").unwrap();

    for _ in 0..3 {
        m.increment_usage(s1.id, KEY).unwrap();
    }
    for _ in 0..2 {
        m.increment_usage(s2.id, KEY).unwrap();
    }

    let usage = quota.usage(USER, Plan::Monthly).unwrap();
    assert_eq!(usage.used, 5);
    assert_eq!(usage.limit, PlanQuota::for_plan(Plan::Monthly).daily_limit);
    assert_eq!(usage.remaining(), usage.limit - 5);
}

#[test]
fn admit_rejects_at_the_plan_limit() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    seed_license(&store);
    let m = manager(store.clone());
    let quota = QuotaEnforcer::new(store);

    let session = m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    let limit = PlanQuota::for_plan(Plan::FreeTrial).daily_limit;

    for _ in 0..limit {
        quota.admit(USER, Plan::FreeTrial).unwrap();
        m.increment_usage(session.id, KEY).unwrap();
    }

    let err = quota.admit(USER, Plan::FreeTrial).unwrap_err();
    assert!(matches!(
        err,
        CoreError::QuotaExceeded { used, limit: l } if used == limit && l == limit
    ));
}

#[test]
fn increment_usage_also_bumps_the_lifetime_total() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    seed_license(&store);
    let m = manager(store.clone());

    let session = m.get_or_create_session(USER, KEY, "fp-1", "firefox").unwrap();
    m.increment_usage(session.id, KEY).unwrap();
    m.increment_usage(session.id, KEY).unwrap();

    let license = store.license_by_key(KEY).unwrap().unwrap();
    assert_eq!(license.total_requests, 2);
}

// ── Usage ledger ─────────────────────────────────────────────────

#[test]
fn ledger_appends_are_readable_in_order() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let ledger = UsageLedger::new(store.clone());

    ledger.record(USER, "generate_keywords", 120, 1, None);
    ledger.record(
        USER,
        "generate_categories",
        80,
        1,
        Some(serde_json::json!({ "batch": 4 })),
    );

    let entries = store.usage_entries(USER).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "generate_keywords");
    assert_eq!(entries[1].action, "generate_categories");
    assert_eq!(entries[1].metadata, Some(serde_json::json!({ "batch": 4 })));
}
