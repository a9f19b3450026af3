//! Append-only usage ledger.
//!
//! One row per admitted request, written after the gated action completes.
//! The ledger is observability, not enforcement: a failed append is logged
//! and the request still succeeds.

use keygate_store::Store;
use keygate_types::UsageLogEntry;
use std::sync::Arc;
use tracing::warn;

/// Records admitted requests for audit and support queries.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<Store>,
}

impl UsageLedger {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Appends one entry. Never fails the calling request.
    pub fn record(
        &self,
        user_id: &str,
        action: &str,
        tokens_used: u32,
        credits_used: u32,
        metadata: Option<serde_json::Value>,
    ) {
        let entry = UsageLogEntry {
            user_id: user_id.to_string(),
            action: action.to_string(),
            tokens_used,
            credits_used,
            timestamp: chrono::Utc::now().timestamp(),
            metadata,
        };
        if let Err(e) = self.store.append_usage(&entry) {
            warn!(user_id, action, error = %e, "failed to append usage ledger entry");
        }
    }
}
