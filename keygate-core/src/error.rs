//! Error taxonomy for the core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by license validation, gating, and webhook processing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing, malformed, or expired credential.
    #[error(transparent)]
    Auth(#[from] keygate_token::AuthError),

    /// License exists but is administratively blocked.
    #[error("license is suspended")]
    LicenseSuspended,

    /// License's entitlement window has ended.
    #[error("license expired at {expired_at}")]
    LicenseExpired { expired_at: i64 },

    /// The billing provider does not recognize the key.
    #[error("invalid license key")]
    LicenseInvalid,

    /// No license record for the authenticated subject.
    #[error("license not found")]
    LicenseNotFound,

    /// The account's daily quota is exhausted.
    #[error("daily quota exceeded: {used}/{limit}")]
    QuotaExceeded { used: u32, limit: u32 },

    /// A new device would exceed the account's device cap.
    #[error("device limit reached (max {max_devices} devices)")]
    DeviceLimitReached { max_devices: u32 },

    /// Malformed request body, headers, or webhook payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Webhook signature mismatch or unconfigured secret.
    #[error("signature error: {0}")]
    Signature(String),

    /// Billing or model provider failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] keygate_store::StoreError),
}
