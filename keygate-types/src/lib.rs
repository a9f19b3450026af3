//! Core domain types for Keygate.
//!
//! This crate holds the data model shared by every other crate:
//! - Identifier newtypes (UUID v7 for natural ordering)
//! - `Plan` and `LicenseStatus` enums
//! - The `License`, `DeviceSession`, `UsageLogEntry`, and `ProcessedWebhook`
//!   records persisted by the store
//! - The static `PlanQuota` catalog (read-only reference data)

mod ids;
mod plan;
mod quota;
mod records;

pub use ids::{LicenseId, SessionId};
pub use plan::{LicenseStatus, Plan};
pub use quota::PlanQuota;
pub use records::{DeviceSession, License, ProcessedWebhook, UsageLogEntry};

/// Seconds in one UTC day.
pub const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Returns the start of the UTC day containing `now` (epoch seconds).
///
/// This is the boundary used for daily counter resets and quota
/// aggregation. A counter whose `daily_reset_at` is older than this
/// boundary belongs to a previous day.
#[must_use]
pub fn utc_day_start(now: i64) -> i64 {
    now - now.rem_euclid(SECS_PER_DAY)
}
