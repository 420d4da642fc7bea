//! What a user may do, derived from their plan.

use serde::{Deserialize, Serialize};

use super::{PlanTier, SubscriptionStatus};
use crate::domain::foundation::Timestamp;

/// Credits granted to users without a paid plan.
pub const FREE_CREDITS: i64 = 100;

/// Credits granted to paid plans. Large enough to be effectively unlimited.
pub const PAID_CREDITS: i64 = 999_999;

/// Usage credit allotment stored on the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAllotment {
    pub current: i64,
    pub limit: i64,
    pub last_reset: Timestamp,
}

impl CreditAllotment {
    /// Full allotment for a tier.
    ///
    /// `reset_at` is taken from the event that caused the reset, not the
    /// wall clock, so replaying that event writes the same row.
    ///
    /// | Tier | Credits |
    /// |------|---------|
    /// | Free | 100 |
    /// | any paid tier | 999 999 |
    pub fn for_tier(tier: PlanTier, reset_at: Timestamp) -> Self {
        let limit = if tier.is_paid() {
            PAID_CREDITS
        } else {
            FREE_CREDITS
        };
        Self {
            current: limit,
            limit,
            last_reset: reset_at,
        }
    }
}

/// Denormalized subscription snapshot kept on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubscription {
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    /// End of the paid-through period. `None` for one-time purchases.
    pub expires_at: Option<Timestamp>,
}

impl UserSubscription {
    /// Snapshot for a user without any purchase.
    pub fn free() -> Self {
        Self {
            tier: PlanTier::Free,
            status: SubscriptionStatus::Active,
            expires_at: None,
        }
    }

    /// Paid features are gated on tier and status together. A canceled
    /// snapshot carries the free tier, so its `expires_at` is informational.
    pub fn has_paid_access(&self) -> bool {
        self.tier.is_paid() && self.status == SubscriptionStatus::Active
    }
}

impl Default for UserSubscription {
    fn default() -> Self {
        Self::free()
    }
}
