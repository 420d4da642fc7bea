//! Internal subscription status and the provider status mapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

/// Internal subscription status.
///
/// Narrower than the provider's taxonomy: every provider state collapses
/// into one of these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Expired,
}

/// Result of mapping a provider status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResolution {
    pub status: SubscriptionStatus,
    /// False when the provider value was not recognised and the
    /// conservative default was applied.
    pub recognized: bool,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Maps a provider subscription status.
    ///
    /// Unknown values fail closed to `Expired`.
    pub fn from_provider(status: &str) -> StatusResolution {
        let known = match status {
            "active" | "trialing" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "past_due" | "unpaid" | "incomplete" | "incomplete_expired" | "paused" => {
                Some(SubscriptionStatus::Expired)
            }
            _ => None,
        };

        match known {
            Some(status) => StatusResolution {
                status,
                recognized: true,
            },
            None => StatusResolution {
                status: SubscriptionStatus::Expired,
                recognized: false,
            },
        }
    }

    /// Statuses that end or suspend the paid period. Writes carrying them
    /// may move `current_period_end` backwards.
    pub fn ends_period(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }
}

impl StateMachine for SubscriptionStatus {
    fn successors(&self) -> &'static [Self] {
        use SubscriptionStatus::*;
        match self {
            Active => &[Expired, Canceled],
            Expired => &[Active, Canceled],
            Canceled => &[],
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "subscription_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}
