//! Daily quota enforcement.
//!
//! Counters live per device session; the enforced limit is the account
//! aggregate: the sum of `daily_requests` over sessions whose counter
//! belongs to today.

use crate::error::{CoreError, CoreResult};
use keygate_store::Store;
use keygate_types::{Plan, PlanQuota, utc_day_start};
use std::sync::Arc;

/// A point-in-time view of an account's daily usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u32,
    pub limit: u32,
}

impl QuotaUsage {
    /// Requests remaining today.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// True if another request would be admitted.
    #[must_use]
    pub fn can_use(&self) -> bool {
        self.used < self.limit
    }
}

/// Admits or denies requests against the plan's daily limit.
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: Arc<Store>,
}

impl QuotaEnforcer {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Sums today's usage across the user's sessions.
    pub fn daily_usage(&self, user_id: &str, today: i64) -> CoreResult<u32> {
        Ok(self.store.daily_usage(user_id, today)?)
    }

    /// Returns the account's current usage against its plan limit.
    pub fn usage(&self, user_id: &str, plan: Plan) -> CoreResult<QuotaUsage> {
        let today = utc_day_start(chrono::Utc::now().timestamp());
        let used = self.daily_usage(user_id, today)?;
        Ok(QuotaUsage {
            used,
            limit: PlanQuota::for_plan(plan).daily_limit,
        })
    }

    /// Admits one request, or fails with [`CoreError::QuotaExceeded`].
    ///
    /// Admission is checked before the gated action runs; the device
    /// counter is incremented only after the action succeeds.
    pub fn admit(&self, user_id: &str, plan: Plan) -> CoreResult<QuotaUsage> {
        let usage = self.usage(user_id, plan)?;
        if usage.can_use() {
            Ok(usage)
        } else {
            Err(CoreError::QuotaExceeded {
                used: usage.used,
                limit: usage.limit,
            })
        }
    }
}
