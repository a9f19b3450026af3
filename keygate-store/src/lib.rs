//! SQLite storage layer for Keygate.
//!
//! Provides durable persistence for licenses, device sessions, the
//! append-only usage log, and the webhook idempotency set.
//!
//! # Architecture
//!
//! - One `rusqlite` connection behind a mutex; every compound
//!   check-then-act sequence (session get-or-create, renewal
//!   extend-or-create, webhook dedup) is a single method that holds the
//!   lock across a SQL transaction, so two concurrent requests cannot
//!   interleave between the check and the write.
//! - Schema migrations run automatically on open.
//! - Uniqueness constraints back the correctness-critical keys:
//!   `licenses.license_key`, `device_sessions(user_id, device_hash)`, and
//!   `processed_webhooks.webhook_id`.

mod error;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{RenewalOutcome, SessionGate, Store};
