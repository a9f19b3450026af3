//! Static plan-quota catalog.
//!
//! Read-only reference data: each plan maps to its request limits, credit
//! pool, batch ceiling, and feature flags. The core never mutates this.

use crate::Plan;
use serde::Serialize;

/// Quota and feature entitlements for one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanQuota {
    /// Requests admitted per UTC day, summed across all of a user's devices.
    pub daily_limit: u32,
    /// Requests admitted per calendar month (informational; daily gate is
    /// the enforced one).
    pub monthly_limit: u32,
    /// Credit pool for credit-metered actions.
    pub credits: u32,
    /// Maximum items per batch request.
    pub max_batch_size: u32,
    /// Per-minute rate limit, enforced by the hosting layer.
    pub rate_limit_per_minute: u32,
    /// Enabled feature flags.
    pub features: Vec<&'static str>,
}

impl PlanQuota {
    /// Returns the quota catalog entry for `plan`.
    #[must_use]
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::FreeTrial => Self {
                daily_limit: 25,
                monthly_limit: 250,
                credits: 100,
                max_batch_size: 5,
                rate_limit_per_minute: 10,
                features: vec!["keywords"],
            },
            Plan::Monthly => Self {
                daily_limit: 500,
                monthly_limit: 10_000,
                credits: 5_000,
                max_batch_size: 50,
                rate_limit_per_minute: 60,
                features: vec!["keywords", "categories"],
            },
            Plan::Yearly => Self {
                daily_limit: 1_000,
                monthly_limit: 20_000,
                credits: 12_000,
                max_batch_size: 100,
                rate_limit_per_minute: 120,
                features: vec!["keywords", "categories", "bulk_export"],
            },
            Plan::Lifetime => Self {
                daily_limit: 2_000,
                monthly_limit: 50_000,
                credits: 30_000,
                max_batch_size: 200,
                rate_limit_per_minute: 240,
                features: vec!["keywords", "categories", "bulk_export", "priority"],
            },
        }
    }

    /// Returns true if this plan enables `feature`.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| *f == feature)
    }
}
