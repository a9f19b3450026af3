//! Error types for token mint/verify.

use thiserror::Error;

/// Credential errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is not three base64url segments.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// HMAC signature does not match.
    #[error("token signature invalid")]
    InvalidSignature,

    /// Payload decoded but is not valid claims JSON.
    #[error("invalid token payload: {0}")]
    InvalidPayload(String),

    /// The `exp` claim is not in the future.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    /// Serialization error while minting.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for token operations.
pub type AuthResult<T> = Result<T, AuthError>;
