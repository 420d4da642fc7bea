//! Append-only payment ledger entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::PlanTier;
use crate::domain::foundation::{Timestamp, UserId, ValidationError};

/// Currency recorded when the provider omits one.
pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "payment_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// What a ledger entry paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerPlan {
    /// Initial purchase of a known plan.
    Tier(PlanTier),
    /// Recurring invoice for an existing subscription.
    SubscriptionRenewal,
    /// Direct payment that did not name a plan we know.
    Unknown,
}

impl LedgerPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerPlan::Tier(tier) => tier.as_str(),
            LedgerPlan::SubscriptionRenewal => "subscription_renewal",
            LedgerPlan::Unknown => "unknown",
        }
    }

    /// Interprets a free-form label from payment metadata.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("subscription_renewal") => LedgerPlan::SubscriptionRenewal,
            Some(other) => other
                .parse::<PlanTier>()
                .map(LedgerPlan::Tier)
                .unwrap_or(LedgerPlan::Unknown),
            None => LedgerPlan::Unknown,
        }
    }
}

impl fmt::Display for LedgerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LedgerPlan {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LedgerPlan {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(LedgerPlan::from_label(Some(&label)))
    }
}

/// A money-movement fact. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Dedup key. Unique across the ledger.
    pub external_payment_id: String,
    pub user_id: UserId,
    pub external_customer_id: Option<String>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub plan_type: LedgerPlan,
    pub metadata: serde_json::Value,
    /// Provider's event time, not the time we wrote the row.
    pub occurred_at: Timestamp,
}

/// Normalizes a provider currency code, defaulting when absent.
pub fn normalize_currency(currency: Option<&str>) -> String {
    match currency.map(str::trim) {
        Some(code) if !code.is_empty() => code.to_ascii_lowercase(),
        _ => DEFAULT_CURRENCY.to_string(),
    }
}
