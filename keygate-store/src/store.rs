//! The `Store`: schema, row mapping, and every compound atomic operation.

use crate::error::{StoreError, StoreResult};
use keygate_types::{DeviceSession, License, LicenseId, LicenseStatus, Plan, SessionId, UsageLogEntry};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS licenses (
    id                       TEXT PRIMARY KEY,
    email                    TEXT NOT NULL,
    license_key              TEXT NOT NULL UNIQUE,
    plan                     TEXT NOT NULL,
    status                   TEXT NOT NULL,
    created_at               INTEGER NOT NULL,
    expires_at               INTEGER NOT NULL,
    last_login               INTEGER,
    total_requests           INTEGER NOT NULL DEFAULT 0,
    payment_provider         TEXT,
    provider_subscription_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_licenses_email ON licenses(email);

CREATE TABLE IF NOT EXISTS device_sessions (
    id                 TEXT PRIMARY KEY,
    user_id            TEXT NOT NULL,
    license_key        TEXT NOT NULL,
    device_fingerprint TEXT NOT NULL,
    device_hash        TEXT NOT NULL,
    browser_agent      TEXT NOT NULL,
    created_at         INTEGER NOT NULL,
    last_used          INTEGER NOT NULL,
    daily_requests     INTEGER NOT NULL DEFAULT 0,
    daily_reset_at     INTEGER NOT NULL,
    is_active          INTEGER NOT NULL DEFAULT 1,
    UNIQUE(user_id, device_hash)
);

CREATE TABLE IF NOT EXISTS usage_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      TEXT NOT NULL,
    action       TEXT NOT NULL,
    tokens_used  INTEGER NOT NULL DEFAULT 0,
    credits_used INTEGER NOT NULL DEFAULT 0,
    timestamp    INTEGER NOT NULL,
    metadata     TEXT
);

CREATE TABLE IF NOT EXISTS processed_webhooks (
    webhook_id   TEXT PRIMARY KEY,
    processed_at INTEGER NOT NULL
);
";

/// Outcome of applying a billing success event to the license table.
#[derive(Debug, Clone)]
pub struct RenewalOutcome {
    pub license: License,
    /// True if no license existed for the email and one was created.
    pub created: bool,
}

/// Outcome of a device-session lookup/insert.
#[derive(Debug, Clone)]
pub enum SessionGate {
    /// The device holds a slot (existing or newly granted).
    Admitted(DeviceSession),
    /// A new device hit the account-wide cap.
    LimitReached { active_sessions: u32 },
}

/// Durable storage for licenses, sessions, usage, and webhook dedup.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database. Used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Licenses ─────────────────────────────────────────────────

    /// Looks up a license by its key.
    pub fn license_by_key(&self, license_key: &str) -> StoreResult<Option<License>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{LICENSE_SELECT} WHERE license_key = ?1"),
                params![license_key],
                read_license,
            )
            .optional()?;
        row.map(into_license).transpose()
    }

    /// Looks up the most recent license for a billing email.
    pub fn license_by_email(&self, email: &str) -> StoreResult<Option<License>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{LICENSE_SELECT} WHERE email = ?1 ORDER BY created_at DESC LIMIT 1"),
                params![email],
                read_license,
            )
            .optional()?;
        row.map(into_license).transpose()
    }

    /// Inserts a license, or updates plan/status/expiry/provider fields if
    /// the key already exists. Conditional write: two concurrent validations
    /// of the same unseen key cannot produce two rows.
    pub fn upsert_license(&self, license: &License) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO licenses (id, email, license_key, plan, status, created_at,
                                   expires_at, last_login, total_requests,
                                   payment_provider, provider_subscription_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(license_key) DO UPDATE SET
                 plan = excluded.plan,
                 status = excluded.status,
                 expires_at = excluded.expires_at,
                 payment_provider = COALESCE(excluded.payment_provider, payment_provider),
                 provider_subscription_id =
                     COALESCE(excluded.provider_subscription_id, provider_subscription_id)",
            params![
                license.id.to_string(),
                license.email,
                license.license_key,
                license.plan.as_str(),
                license.status.as_str(),
                license.created_at,
                license.expires_at,
                license.last_login,
                license.total_requests,
                license.payment_provider,
                license.provider_subscription_id,
            ],
        )?;
        Ok(())
    }

    /// Stamps `last_login` on a successful validation.
    pub fn record_login(&self, license_key: &str, now: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE licenses SET last_login = ?1 WHERE license_key = ?2",
            params![now, license_key],
        )?;
        Ok(())
    }

    /// Bumps the lifetime request counter for a license.
    pub fn increment_total_requests(&self, license_key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE licenses SET total_requests = total_requests + 1 WHERE license_key = ?1",
            params![license_key],
        )?;
        Ok(())
    }

    /// Applies a billing success event: extends the existing license for
    /// `email` (`max(current_expiry, now) + duration`, status forced back
    /// to active) or creates a new one with `expires_at = now + duration`.
    ///
    /// The whole read-compute-write runs in one transaction. `make_key`
    /// supplies candidate keys for the insert path; the UNIQUE constraint
    /// on `license_key` backs collision retries.
    pub fn renew_or_create_license(
        &self,
        email: &str,
        plan: Plan,
        duration_secs: i64,
        now: i64,
        provider: &str,
        subscription_id: Option<&str>,
        make_key: &dyn Fn() -> String,
    ) -> StoreResult<RenewalOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("{LICENSE_SELECT} WHERE email = ?1 ORDER BY created_at DESC LIMIT 1"),
                params![email],
                read_license,
            )
            .optional()?
            .map(into_license)
            .transpose()?;

        let outcome = match existing {
            Some(mut license) => {
                // Expired licenses restart from now; active ones extend
                // from their current expiry. Never double-counts time.
                let new_expiry = license.expires_at.max(now) + duration_secs;
                tx.execute(
                    "UPDATE licenses SET expires_at = ?1, status = 'active', plan = ?2,
                         payment_provider = ?3,
                         provider_subscription_id = COALESCE(?4, provider_subscription_id)
                     WHERE id = ?5",
                    params![
                        new_expiry,
                        plan.as_str(),
                        provider,
                        subscription_id,
                        license.id.to_string()
                    ],
                )?;
                license.expires_at = new_expiry;
                license.status = LicenseStatus::Active;
                license.plan = plan;
                license.payment_provider = Some(provider.to_string());
                if let Some(sub) = subscription_id {
                    license.provider_subscription_id = Some(sub.to_string());
                }
                RenewalOutcome {
                    license,
                    created: false,
                }
            }
            None => {
                let license = insert_new_license(
                    &tx,
                    email,
                    plan,
                    now,
                    now + duration_secs,
                    provider,
                    subscription_id,
                    make_key,
                )?;
                RenewalOutcome {
                    license,
                    created: true,
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Marks one license as expired by its key. Returns true if a row was
    /// touched. Used for validation-time expiry transitions.
    pub fn expire_license_by_key(&self, license_key: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE licenses SET status = 'expired' WHERE license_key = ?1",
            params![license_key],
        )?;
        Ok(changed > 0)
    }

    /// Marks every license for `email` as expired. Returns the number of
    /// rows touched.
    pub fn expire_license_by_email(&self, email: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE licenses SET status = 'expired' WHERE email = ?1",
            params![email],
        )?;
        Ok(changed)
    }

    // ── Device sessions ──────────────────────────────────────────

    /// Looks up the session for `(user_id, device_hash)`, resetting a stale
    /// daily counter and refreshing `last_used`; creates a new session only
    /// if the device is unseen and the account is below `max_devices`.
    ///
    /// The existing-session check runs before the cap count, so a device
    /// that already holds a slot is never rejected by the cap. The whole
    /// sequence is one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create_session(
        &self,
        user_id: &str,
        license_key: &str,
        fingerprint: &str,
        device_hash: &str,
        agent: &str,
        now: i64,
        today: i64,
        max_devices: u32,
    ) -> StoreResult<SessionGate> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("{SESSION_SELECT} WHERE user_id = ?1 AND device_hash = ?2"),
                params![user_id, device_hash],
                read_session,
            )
            .optional()?
            .map(into_session)
            .transpose()?;

        let gate = match existing {
            Some(mut session) => {
                if session.daily_reset_at < today {
                    // Counter belongs to a previous UTC day: reset once.
                    tx.execute(
                        "UPDATE device_sessions
                         SET daily_requests = 0, daily_reset_at = ?1, last_used = ?2
                         WHERE id = ?3",
                        params![today, now, session.id.to_string()],
                    )?;
                    session.daily_requests = 0;
                    session.daily_reset_at = today;
                } else {
                    tx.execute(
                        "UPDATE device_sessions SET last_used = ?1 WHERE id = ?2",
                        params![now, session.id.to_string()],
                    )?;
                }
                session.last_used = now;
                SessionGate::Admitted(session)
            }
            None => {
                let active: u32 = tx.query_row(
                    "SELECT COUNT(*) FROM device_sessions
                     WHERE user_id = ?1 AND is_active = 1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                if active >= max_devices {
                    debug!(user_id, active, "device cap reached for new device");
                    SessionGate::LimitReached {
                        active_sessions: active,
                    }
                } else {
                    let session = DeviceSession {
                        id: SessionId::new(),
                        user_id: user_id.to_string(),
                        license_key: license_key.to_string(),
                        device_fingerprint: fingerprint.to_string(),
                        device_hash: device_hash.to_string(),
                        browser_agent: agent.to_string(),
                        created_at: now,
                        last_used: now,
                        daily_requests: 0,
                        daily_reset_at: today,
                        is_active: true,
                    };
                    tx.execute(
                        "INSERT INTO device_sessions
                             (id, user_id, license_key, device_fingerprint, device_hash,
                              browser_agent, created_at, last_used, daily_requests,
                              daily_reset_at, is_active)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, 1)",
                        params![
                            session.id.to_string(),
                            session.user_id,
                            session.license_key,
                            session.device_fingerprint,
                            session.device_hash,
                            session.browser_agent,
                            session.created_at,
                            session.last_used,
                            session.daily_reset_at,
                        ],
                    )?;
                    SessionGate::Admitted(session)
                }
            }
        };

        tx.commit()?;
        Ok(gate)
    }

    /// Adds exactly one admitted request to a session's daily counter.
    pub fn increment_session_usage(&self, session_id: SessionId, now: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE device_sessions
             SET daily_requests = daily_requests + 1, last_used = ?1
             WHERE id = ?2",
            params![now, session_id.to_string()],
        )?;
        Ok(())
    }

    /// Sums today's requests across all of a user's active sessions.
    pub fn daily_usage(&self, user_id: &str, today: i64) -> StoreResult<u32> {
        let conn = self.conn()?;
        let used: u32 = conn.query_row(
            "SELECT COALESCE(SUM(daily_requests), 0) FROM device_sessions
             WHERE user_id = ?1 AND daily_reset_at >= ?2 AND is_active = 1",
            params![user_id, today],
            |row| row.get(0),
        )?;
        Ok(used)
    }

    /// Counts a user's active sessions.
    pub fn active_session_count(&self, user_id: &str) -> StoreResult<u32> {
        let conn = self.conn()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM device_sessions WHERE user_id = ?1 AND is_active = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetches a session by its device identity. Used by tests.
    pub fn session_by_device(
        &self,
        user_id: &str,
        device_hash: &str,
    ) -> StoreResult<Option<DeviceSession>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{SESSION_SELECT} WHERE user_id = ?1 AND device_hash = ?2"),
                params![user_id, device_hash],
                read_session,
            )
            .optional()?;
        row.map(into_session).transpose()
    }

    // ── Webhook idempotency ──────────────────────────────────────

    /// Records a webhook id as processed. Returns `true` if this call
    /// inserted the id, `false` if it was already present (duplicate
    /// delivery). `INSERT OR IGNORE` against the primary key makes the
    /// check-and-claim a single conditional write.
    pub fn insert_processed_webhook(&self, webhook_id: &str, now: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_webhooks (webhook_id, processed_at)
             VALUES (?1, ?2)",
            params![webhook_id, now],
        )?;
        Ok(inserted > 0)
    }

    // ── Usage log ────────────────────────────────────────────────

    /// Appends one entry to the usage log.
    pub fn append_usage(&self, entry: &UsageLogEntry) -> StoreResult<()> {
        let metadata = entry
            .metadata
            .as_ref()
            .map(serde_json::Value::to_string);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO usage_log (user_id, action, tokens_used, credits_used, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id,
                entry.action,
                entry.tokens_used,
                entry.credits_used,
                entry.timestamp,
                metadata,
            ],
        )?;
        Ok(())
    }

    /// Returns all usage entries for a user, oldest first. Used by tests.
    pub fn usage_entries(&self, user_id: &str) -> StoreResult<Vec<UsageLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, action, tokens_used, credits_used, timestamp, metadata
             FROM usage_log WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, action, tokens_used, credits_used, timestamp, metadata) = row?;
            let metadata = metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .map_err(|e| StoreError::Corrupt(format!("usage metadata: {e}")))?;
            entries.push(UsageLogEntry {
                user_id,
                action,
                tokens_used,
                credits_used,
                timestamp,
                metadata,
            });
        }
        Ok(entries)
    }
}

// ── Row mapping ──────────────────────────────────────────────────

const LICENSE_SELECT: &str = "SELECT id, email, license_key, plan, status, created_at, \
     expires_at, last_login, total_requests, payment_provider, provider_subscription_id \
     FROM licenses";

const SESSION_SELECT: &str = "SELECT id, user_id, license_key, device_fingerprint, device_hash, \
     browser_agent, created_at, last_used, daily_requests, daily_reset_at, is_active \
     FROM device_sessions";

struct LicenseRow {
    id: String,
    email: String,
    license_key: String,
    plan: String,
    status: String,
    created_at: i64,
    expires_at: i64,
    last_login: Option<i64>,
    total_requests: i64,
    payment_provider: Option<String>,
    provider_subscription_id: Option<String>,
}

fn read_license(row: &Row<'_>) -> rusqlite::Result<LicenseRow> {
    Ok(LicenseRow {
        id: row.get(0)?,
        email: row.get(1)?,
        license_key: row.get(2)?,
        plan: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        last_login: row.get(7)?,
        total_requests: row.get(8)?,
        payment_provider: row.get(9)?,
        provider_subscription_id: row.get(10)?,
    })
}

fn into_license(row: LicenseRow) -> StoreResult<License> {
    Ok(License {
        id: LicenseId::parse(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("license id: {e}")))?,
        email: row.email,
        license_key: row.license_key,
        plan: Plan::from_str(&row.plan).map_err(StoreError::Corrupt)?,
        status: LicenseStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
        created_at: row.created_at,
        expires_at: row.expires_at,
        last_login: row.last_login,
        total_requests: row.total_requests,
        payment_provider: row.payment_provider,
        provider_subscription_id: row.provider_subscription_id,
    })
}

struct SessionRow {
    id: String,
    user_id: String,
    license_key: String,
    device_fingerprint: String,
    device_hash: String,
    browser_agent: String,
    created_at: i64,
    last_used: i64,
    daily_requests: u32,
    daily_reset_at: i64,
    is_active: bool,
}

fn read_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        license_key: row.get(2)?,
        device_fingerprint: row.get(3)?,
        device_hash: row.get(4)?,
        browser_agent: row.get(5)?,
        created_at: row.get(6)?,
        last_used: row.get(7)?,
        daily_requests: row.get(8)?,
        daily_reset_at: row.get(9)?,
        is_active: row.get(10)?,
    })
}

fn into_session(row: SessionRow) -> StoreResult<DeviceSession> {
    Ok(DeviceSession {
        id: SessionId::parse(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("session id: {e}")))?,
        user_id: row.user_id,
        license_key: row.license_key,
        device_fingerprint: row.device_fingerprint,
        device_hash: row.device_hash,
        browser_agent: row.browser_agent,
        created_at: row.created_at,
        last_used: row.last_used,
        daily_requests: row.daily_requests,
        daily_reset_at: row.daily_reset_at,
        is_active: row.is_active,
    })
}

/// Inserts a fresh license inside an open transaction, retrying key
/// collisions a bounded number of times against the UNIQUE constraint.
fn insert_new_license(
    tx: &rusqlite::Transaction<'_>,
    email: &str,
    plan: Plan,
    now: i64,
    expires_at: i64,
    provider: &str,
    subscription_id: Option<&str>,
    make_key: &dyn Fn() -> String,
) -> StoreResult<License> {
    const MAX_KEY_ATTEMPTS: usize = 4;

    let mut last_err = None;
    for _ in 0..MAX_KEY_ATTEMPTS {
        let license = License {
            id: LicenseId::new(),
            email: email.to_string(),
            license_key: make_key(),
            plan,
            status: LicenseStatus::Active,
            created_at: now,
            expires_at,
            last_login: None,
            total_requests: 0,
            payment_provider: Some(provider.to_string()),
            provider_subscription_id: subscription_id.map(str::to_string),
        };
        let result = tx.execute(
            "INSERT INTO licenses (id, email, license_key, plan, status, created_at,
                                   expires_at, last_login, total_requests,
                                   payment_provider, provider_subscription_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 0, ?8, ?9)",
            params![
                license.id.to_string(),
                license.email,
                license.license_key,
                license.plan.as_str(),
                license.status.as_str(),
                license.created_at,
                license.expires_at,
                license.payment_provider,
                license.provider_subscription_id,
            ],
        );
        match result {
            Ok(_) => return Ok(license),
            Err(e) if is_unique_violation(&e) => {
                debug!("license key collision, regenerating");
                last_err = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err
        .map(Into::into)
        .unwrap_or(StoreError::Corrupt("key generation exhausted".to_string())))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
