//! The set of writes one event produces, applied atomically.

use super::{CreditAllotment, PaymentRecord, SubscriptionRecord, UpsertDecision, UserSubscription};
use crate::domain::foundation::UserId;

/// Changes to the subscription snapshot on the user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub subscription: UserSubscription,
    /// `None` leaves credits untouched.
    pub credits: Option<CreditAllotment>,
    /// `None` leaves the stored customer id untouched.
    pub stripe_customer_id: Option<String>,
}

/// Everything one event writes.
///
/// Stores apply it in a single transaction:
/// 1. ledger insert, ignored on duplicate `external_payment_id`;
/// 2. subscription upsert through the guard in [`SubscriptionRecord::decide`];
/// 3. snapshot update, skipped when step 2 was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingWrite {
    pub user_id: UserId,
    pub payment: Option<PaymentRecord>,
    pub subscription: Option<SubscriptionRecord>,
    pub snapshot: Option<SnapshotUpdate>,
}

impl BillingWrite {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            payment: None,
            subscription: None,
            snapshot: None,
        }
    }

    pub fn with_payment(mut self, payment: PaymentRecord) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionRecord) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotUpdate) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payment.is_none() && self.subscription.is_none() && self.snapshot.is_none()
    }
}

/// Ledger step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Recorded,
    Duplicate,
    Skipped,
}

/// Subscription step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    Applied,
    Rejected(UpsertDecision),
    Skipped,
}

/// What the store actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub ledger: LedgerOutcome,
    pub subscription: SubscriptionOutcome,
    pub snapshot_updated: bool,
}

impl ApplyOutcome {
    /// Whether the snapshot step should run given the subscription result.
    pub fn snapshot_allowed(subscription: SubscriptionOutcome) -> bool {
        !matches!(subscription, SubscriptionOutcome::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_write_has_no_parts() {
        let write = BillingWrite::for_user(UserId::new("u1").unwrap());
        assert!(write.is_empty());
    }

    #[test]
    fn rejected_subscription_blocks_snapshot() {
        assert!(!ApplyOutcome::snapshot_allowed(SubscriptionOutcome::Rejected(
            UpsertDecision::RejectStalePeriod
        )));
        assert!(ApplyOutcome::snapshot_allowed(SubscriptionOutcome::Applied));
        assert!(ApplyOutcome::snapshot_allowed(SubscriptionOutcome::Skipped));
    }
}
