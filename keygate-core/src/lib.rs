//! License validation, device gating, quota enforcement, and webhook
//! lifecycle processing for Keygate.
//!
//! This crate handles:
//! - License key validation with billing-provider fallback and token issuance
//! - Per-device session tracking with an account-wide device cap
//! - Daily quota aggregation across a license's devices
//! - Signature-verified, idempotent webhook ingestion that mutates license
//!   lifecycle state asynchronously
//! - The append-only usage ledger
//!
//! # Design Principles
//!
//! - **Fail closed**: an unconfigured webhook secret rejects every delivery;
//!   signature comparisons are constant-time.
//! - **Idempotent under at-least-once delivery**: the durable
//!   `processed_webhooks` table claims each webhook id exactly once.
//! - **Atomic check-then-act**: every lookup-then-write sequence runs as a
//!   single store transaction or conditional write.

mod billing;
mod catalog;
mod device;
mod error;
mod ledger;
mod model;
mod quota;
mod validator;
mod webhook;

pub use billing::{BillingVerification, DodoClient};
pub use catalog::ProductCatalog;
pub use device::{DeviceSessionManager, MAX_DEVICES_PER_LICENSE};
pub use error::{CoreError, CoreResult};
pub use ledger::UsageLedger;
pub use model::ModelClient;
pub use quota::{QuotaEnforcer, QuotaUsage};
pub use validator::{LicenseValidator, ValidatedLicense, TOKEN_TTL_SECS};
pub use webhook::{
    WebhookAck, WebhookEnvelope, WebhookEvent, WebhookProcessor, generate_license_key,
};
