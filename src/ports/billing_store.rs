//! Port for billing persistence.
//!
//! The store is the only shared mutable state. Every guarantee that makes
//! concurrent or repeated deliveries safe lives behind [`BillingStore::apply`].

use async_trait::async_trait;

use crate::domain::billing::{ApplyOutcome, BillingAccount, BillingWrite, PaymentRecord, SubscriptionRecord};
use crate::domain::foundation::{DomainError, UserId};

/// Reads and atomic writes for users, subscriptions and the payment ledger.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Find a user by internal id.
    async fn find_account(&self, user_id: &UserId) -> Result<Option<BillingAccount>, DomainError>;

    /// Find the user holding a provider customer id.
    ///
    /// Checks the user row first, then the subscription row.
    async fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingAccount>, DomainError>;

    /// Find a user by email. Best effort: emails are not guaranteed unique
    /// and implementations return the oldest match.
    async fn find_account_by_email(&self, email: &str)
        -> Result<Option<BillingAccount>, DomainError>;

    /// The user's subscription row, if any.
    async fn find_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Ledger lookup by dedup key.
    async fn find_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError>;

    /// Ledger entries for a user, oldest first.
    async fn payments_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>, DomainError>;

    /// Applies every part of `write` in one transaction.
    ///
    /// - Ledger: insert unless `external_payment_id` exists.
    /// - Subscription: upsert on `user_id`, guarded by
    ///   [`SubscriptionRecord::decide`] against the stored row.
    /// - Snapshot: skipped when the subscription upsert was rejected.
    ///
    /// Applying the same write twice leaves the same rows as applying it once.
    async fn apply(&self, write: BillingWrite) -> Result<ApplyOutcome, DomainError>;
}
