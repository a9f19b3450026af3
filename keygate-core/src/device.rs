//! Device session management.
//!
//! Device identity is a one-way hash binding the raw client fingerprint to
//! the account and a server secret, so a fingerprint cannot be compared or
//! replayed across accounts. Sessions are capped per account and carry the
//! per-device daily counters the quota enforcer aggregates.

use crate::error::{CoreError, CoreResult};
use keygate_store::{SessionGate, Store};
use keygate_types::{DeviceSession, SessionId, utc_day_start};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Maximum concurrently active sessions per account.
pub const MAX_DEVICES_PER_LICENSE: u32 = 2;

/// Tracks device sessions and enforces the account device cap.
#[derive(Clone)]
pub struct DeviceSessionManager {
    store: Arc<Store>,
    server_secret: Vec<u8>,
}

impl DeviceSessionManager {
    /// Creates a manager with the secret used for device-hash binding.
    #[must_use]
    pub fn new(store: Arc<Store>, server_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            server_secret: server_secret.into(),
        }
    }

    /// Derives the account-bound device hash.
    ///
    /// Binding `user_id` and the server secret into the hash keeps one
    /// account's fingerprint from matching or being replayed against
    /// another account's sessions.
    #[must_use]
    pub fn device_hash(&self, fingerprint: &str, agent: &str, user_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        hasher.update(b"|");
        hasher.update(agent.as_bytes());
        hasher.update(b"|");
        hasher.update(user_id.as_bytes());
        hasher.update(b"|");
        hasher.update(&self.server_secret);
        hex::encode(hasher.finalize())
    }

    /// Returns the session for this device, creating it if unseen.
    ///
    /// A device that already holds a slot is always admitted (its stale
    /// daily counter is reset and `last_used` refreshed); only a genuinely
    /// new device can trip [`CoreError::DeviceLimitReached`].
    pub fn get_or_create_session(
        &self,
        user_id: &str,
        license_key: &str,
        fingerprint: &str,
        agent: &str,
    ) -> CoreResult<DeviceSession> {
        let now = chrono::Utc::now().timestamp();
        let today = utc_day_start(now);
        let device_hash = self.device_hash(fingerprint, agent, user_id);

        match self.store.get_or_create_session(
            user_id,
            license_key,
            fingerprint,
            &device_hash,
            agent,
            now,
            today,
            MAX_DEVICES_PER_LICENSE,
        )? {
            SessionGate::Admitted(session) => Ok(session),
            SessionGate::LimitReached { .. } => Err(CoreError::DeviceLimitReached {
                max_devices: MAX_DEVICES_PER_LICENSE,
            }),
        }
    }

    /// Adds exactly one admitted request to the session's daily counter and
    /// to the license's lifetime total. Called only after the gated action
    /// succeeds.
    pub fn increment_usage(&self, session_id: SessionId, license_key: &str) -> CoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        self.store.increment_session_usage(session_id, now)?;
        self.store.increment_total_requests(license_key)?;
        Ok(())
    }

    /// Counts the account's active sessions (for the stats endpoint).
    pub fn active_device_count(&self, user_id: &str) -> CoreResult<u32> {
        Ok(self.store.active_session_count(user_id)?)
    }
}
