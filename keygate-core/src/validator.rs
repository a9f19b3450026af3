//! License validation and credential issuance.

use crate::billing::DodoClient;
use crate::error::{CoreError, CoreResult};
use keygate_store::Store;
use keygate_token::{TokenClaims, TokenIssuer};
use keygate_types::{License, LicenseId, LicenseStatus, Plan, PlanQuota};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifetime of an issued token.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// The result of a successful validation: a minted token plus the
/// entitlement snapshot returned to the client.
#[derive(Debug, Clone)]
pub struct ValidatedLicense {
    pub token: String,
    pub email: String,
    pub plan: Plan,
    pub quota: PlanQuota,
    pub expires_at: i64,
}

/// Resolves license keys to entitlements, consulting the billing provider
/// for keys with no local record.
#[derive(Clone)]
pub struct LicenseValidator {
    store: Arc<Store>,
    issuer: TokenIssuer,
    billing: DodoClient,
}

impl LicenseValidator {
    #[must_use]
    pub fn new(store: Arc<Store>, issuer: TokenIssuer, billing: DodoClient) -> Self {
        Self {
            store,
            issuer,
            billing,
        }
    }

    /// Validates a license key and mints a short-lived token.
    ///
    /// Local records are authoritative: a suspended or expired license
    /// fails without consulting the provider. Unseen keys are verified
    /// with the provider and upserted locally.
    pub async fn validate(&self, license_key: &str) -> CoreResult<ValidatedLicense> {
        let now = chrono::Utc::now().timestamp();

        if let Some(license) = self.store.license_by_key(license_key)? {
            return self.validate_local(license, now);
        }

        // First sight of this key: the billing provider is the authority.
        let Some(verification) = self.billing.verify_license(license_key).await? else {
            return Err(CoreError::LicenseInvalid);
        };

        let license = License {
            id: LicenseId::new(),
            email: verification.email,
            license_key: license_key.to_string(),
            plan: verification.plan,
            status: LicenseStatus::Active,
            created_at: now,
            expires_at: now + verification.plan.duration_secs(),
            last_login: Some(now),
            total_requests: 0,
            payment_provider: Some("dodo".to_string()),
            provider_subscription_id: verification.subscription_id,
        };
        self.store.upsert_license(&license)?;
        info!(plan = %license.plan, "license created from billing verification");

        self.issue(license, now)
    }

    fn validate_local(&self, license: License, now: i64) -> CoreResult<ValidatedLicense> {
        match license.status {
            LicenseStatus::Suspended => return Err(CoreError::LicenseSuspended),
            LicenseStatus::Expired => {
                return Err(CoreError::LicenseExpired {
                    expired_at: license.expires_at,
                });
            }
            LicenseStatus::Active => {}
        }
        if license.expires_at <= now {
            // Validation-time expiry check: the record lapsed without a
            // webhook; persist the transition so later reads agree.
            if let Err(e) = self.store.expire_license_by_key(&license.license_key) {
                warn!(error = %e, "failed to persist validation-time expiry");
            }
            return Err(CoreError::LicenseExpired {
                expired_at: license.expires_at,
            });
        }

        self.store.record_login(&license.license_key, now)?;
        self.issue(license, now)
    }

    fn issue(&self, license: License, now: i64) -> CoreResult<ValidatedLicense> {
        let token = self.issuer.mint(&TokenClaims {
            sub: license.license_key.clone(),
            plan: license.plan,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        })?;
        Ok(ValidatedLicense {
            token,
            email: license.email,
            plan: license.plan,
            quota: PlanQuota::for_plan(license.plan),
            expires_at: license.expires_at,
        })
    }
}
