//! License plans and lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The subscription plan attached to a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Limited-time free access.
    FreeTrial,
    /// Monthly subscription.
    Monthly,
    /// Yearly subscription.
    Yearly,
    /// One-time purchase, effectively never expires.
    Lifetime,
}

impl Plan {
    /// Returns the entitlement duration in seconds granted by one
    /// purchase or renewal of this plan.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        const DAY: i64 = 24 * 60 * 60;
        match self {
            Self::FreeTrial => 7 * DAY,
            Self::Monthly => 30 * DAY,
            Self::Yearly => 365 * DAY,
            Self::Lifetime => 100 * 365 * DAY,
        }
    }

    /// Returns the wire name of this plan (matches the serde encoding).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreeTrial => "free_trial",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Lifetime => "lifetime",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_trial" => Ok(Self::FreeTrial),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "lifetime" => Ok(Self::Lifetime),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

/// The lifecycle status of a license record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    /// License is entitled; requests may be admitted.
    Active,
    /// License is administratively blocked.
    Suspended,
    /// License's entitlement window has ended.
    Expired,
}

impl LicenseStatus {
    /// Returns the wire name of this status (matches the serde encoding).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown license status: {other}")),
        }
    }
}
