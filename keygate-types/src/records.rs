//! Persisted records: licenses, device sessions, usage log, webhook dedup.

use crate::{LicenseId, LicenseStatus, Plan, SessionId};
use serde::{Deserialize, Serialize};

/// A purchased entitlement, keyed by its globally unique license key.
///
/// `expires_at` only moves forward: renewals extend it via
/// `max(current, now) + duration`, never backward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: LicenseId,
    pub email: String,
    pub license_key: String,
    pub plan: Plan,
    pub status: LicenseStatus,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds.
    pub expires_at: i64,
    /// Epoch seconds of the last successful validation, if any.
    pub last_login: Option<i64>,
    /// Lifetime count of admitted requests.
    pub total_requests: i64,
    /// Payment provider that sourced this license (e.g. "dodo").
    pub payment_provider: Option<String>,
    /// Provider-side subscription identifier, when known.
    pub provider_subscription_id: Option<String>,
}

impl License {
    /// Returns true if the license is entitled at `now`.
    #[must_use]
    pub fn is_entitled(&self, now: i64) -> bool {
        self.status == LicenseStatus::Active && self.expires_at > now
    }
}

/// Per-device usage-tracking row, bounded per account by the device cap.
///
/// `daily_requests` belongs to the UTC day starting at `daily_reset_at`;
/// it resets to zero exactly once when the boundary is crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub id: SessionId,
    pub user_id: String,
    pub license_key: String,
    /// Raw client-supplied identifier; never compared across accounts.
    pub device_fingerprint: String,
    /// Account-bound one-way hash of the fingerprint (see the device
    /// session manager for the derivation).
    pub device_hash: String,
    pub browser_agent: String,
    pub created_at: i64,
    pub last_used: i64,
    pub daily_requests: u32,
    /// UTC day boundary (epoch seconds) the counter belongs to.
    pub daily_reset_at: i64,
    pub is_active: bool,
}

/// One append-only entry in the usage ledger.
///
/// Observability and audit only; never gates anything and is never
/// mutated or deleted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub user_id: String,
    pub action: String,
    pub tokens_used: u32,
    pub credits_used: u32,
    pub timestamp: i64,
    pub metadata: Option<serde_json::Value>,
}

/// Durable idempotency record: a webhook id that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedWebhook {
    pub webhook_id: String,
    pub processed_at: i64,
}
