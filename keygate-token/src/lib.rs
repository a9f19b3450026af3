//! Short-lived signed credentials for Keygate.
//!
//! Tokens use the format: `base64url(header).base64url(payload).base64url(sig)`
//!
//! The header is fixed (`{"alg":"HS256","typ":"JWT"}`), the payload carries
//! `{sub, plan, iat, exp}`, and the signature is HMAC-SHA256 over the
//! `header.payload` string using a shared secret. All three segments are
//! base64url-encoded without padding.
//!
//! `verify` enforces both the signature and the `exp` claim. There is no
//! verification path that skips expiry; callers cannot opt out.

mod error;

pub use error::{AuthError, AuthResult};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use keygate_types::Plan;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fixed token header, pre-encoded once per mint.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// The claims carried by a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The license key this token was issued for.
    pub sub: String,
    /// Plan entitlement at issuance time.
    pub plan: Plan,
    /// Issued-at (epoch seconds).
    pub iat: i64,
    /// Expiry (epoch seconds). Checked on every `verify`.
    pub exp: i64,
}

/// Mints and verifies signed tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
}

impl TokenIssuer {
    /// Creates an issuer from the shared signing secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mints a signed token for the given claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized.
    pub fn mint(&self, claims: &TokenClaims) -> AuthResult<String> {
        let header_b64 = URL_SAFE_NO_PAD.encode(HEADER_JSON.as_bytes());
        let payload_json = serde_json::to_vec(claims)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_json);

        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig_b64 = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        Ok(format!("{signing_input}.{sig_b64}"))
    }

    /// Verifies a token's signature and expiry, returning the claims.
    ///
    /// The signature comparison is constant-time, and `exp` is checked
    /// against the current time unconditionally.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Malformed`] if the token is not three base64url parts
    /// - [`AuthError::InvalidSignature`] on MAC mismatch
    /// - [`AuthError::Expired`] if `exp` is not in the future
    pub fn verify(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Verifies a token against an explicit clock. Exposed for expiry tests.
    pub fn verify_at(&self, token: &str, now: i64) -> AuthResult<TokenClaims> {
        let token = token.trim();

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::Malformed(
                "token must have exactly three parts separated by dots".to_string(),
            ));
        }
        let (header_b64, payload_b64, sig_b64) = (parts[0], parts[1], parts[2]);

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|e| AuthError::Malformed(format!("invalid signature base64: {e}")))?;

        // Constant-time MAC comparison; signature checked before decoding
        // the payload so malformed-but-unsigned input never reaches serde.
        let signing_input = format!("{header_b64}.{payload_b64}");
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| AuthError::InvalidSignature)?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| AuthError::Malformed(format!("invalid payload base64: {e}")))?;
        let claims: TokenClaims = serde_json::from_slice(&payload_json)
            .map_err(|e| AuthError::InvalidPayload(format!("invalid payload JSON: {e}")))?;

        if claims.exp <= now {
            return Err(AuthError::Expired { expired_at: claims.exp });
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(HEADER_JSON).unwrap();
        assert_eq!(parsed["alg"], "HS256");
    }
}
