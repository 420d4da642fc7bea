//! The per-user subscription row and its write guard.

use serde::{Deserialize, Serialize};

use super::{PlanTier, SubscriptionStatus};
use crate::domain::foundation::{StateMachine, Timestamp, UserId};

/// One logical subscription per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub user_id: UserId,
    pub external_subscription_id: String,
    pub external_customer_id: String,
    pub plan_type: PlanTier,
    pub status: SubscriptionStatus,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
}

/// Verdict of the guard for an incoming write against the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertDecision {
    /// The incoming row replaces the stored one.
    Apply,
    /// The stored status cannot move to the incoming one (e.g. a late
    /// `active` after a cancellation).
    RejectTransition,
    /// The incoming row would move `current_period_end` backwards.
    RejectStalePeriod,
    /// The incoming row describes a subscription the user has moved away from.
    RejectSuperseded,
}

impl UpsertDecision {
    pub fn is_apply(&self) -> bool {
        matches!(self, UpsertDecision::Apply)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertDecision::Apply => "apply",
            UpsertDecision::RejectTransition => "reject_transition",
            UpsertDecision::RejectStalePeriod => "reject_stale_period",
            UpsertDecision::RejectSuperseded => "reject_superseded",
        }
    }
}

impl SubscriptionRecord {
    /// Decides whether `incoming` may overwrite this stored row.
    ///
    /// Same subscription id:
    /// - the status change must be a self-loop or a legal transition
    ///   (`canceled` accepts nothing but `canceled`);
    /// - `canceled`/`expired` writes apply regardless of period;
    /// - otherwise `current_period_end` must not decrease.
    ///
    /// Different subscription id: only an `active` row replaces the stored
    /// one (re-subscription). Anything else describes the old subscription.
    ///
    /// The Postgres adapter encodes the same rules in its upsert `WHERE`.
    pub fn decide(&self, incoming: &SubscriptionRecord) -> UpsertDecision {
        if self.external_subscription_id != incoming.external_subscription_id {
            return if incoming.status == SubscriptionStatus::Active {
                UpsertDecision::Apply
            } else {
                UpsertDecision::RejectSuperseded
            };
        }

        if self.status != incoming.status && !self.status.can_transition_to(&incoming.status) {
            return UpsertDecision::RejectTransition;
        }

        if incoming.status.ends_period()
            || incoming.current_period_end >= self.current_period_end
        {
            UpsertDecision::Apply
        } else {
            UpsertDecision::RejectStalePeriod
        }
    }
}
