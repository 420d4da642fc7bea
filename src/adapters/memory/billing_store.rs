//! In-memory billing store.
//!
//! Same contract as the Postgres store: the whole unit of work runs under one
//! write lock, and the subscription guard is [`SubscriptionRecord::decide`].
//! Used by tests and by local runs without a database.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::{
    ApplyOutcome, BillingAccount, BillingWrite, LedgerOutcome, PaymentRecord, SubscriptionOutcome,
    SubscriptionRecord,
};
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::ports::BillingStore;

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as signup order.
    accounts: Vec<BillingAccount>,
    subscriptions: Vec<SubscriptionRecord>,
    payments: Vec<PaymentRecord>,
    fail_next_apply: Option<String>,
}

/// Billing store backed by process memory.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: RwLock<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user, as the signup flow would.
    pub async fn insert_account(&self, account: BillingAccount) {
        let mut state = self.state.write().await;
        state.accounts.retain(|a| a.user_id != account.user_id);
        state.accounts.push(account);
    }

    /// Seeds a subscription row.
    pub async fn insert_subscription(&self, record: SubscriptionRecord) {
        let mut state = self.state.write().await;
        state.subscriptions.retain(|s| s.user_id != record.user_id);
        state.subscriptions.push(record);
    }

    // === Test Helpers ===

    /// Makes the next `apply` fail as a lost database connection would.
    pub async fn fail_next_apply(&self, message: impl Into<String>) {
        self.state.write().await.fail_next_apply = Some(message.into());
    }

    pub async fn accounts(&self) -> Vec<BillingAccount> {
        self.state.read().await.accounts.clone()
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.state.read().await.subscriptions.clone()
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.read().await.payments.clone()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_account(&self, user_id: &UserId) -> Result<Option<BillingAccount>, DomainError> {
        let state = self.state.read().await;
        Ok(state.accounts.iter().find(|a| &a.user_id == user_id).cloned())
    }

    async fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingAccount>, DomainError> {
        let state = self.state.read().await;
        if let Some(account) = state
            .accounts
            .iter()
            .find(|a| a.stripe_customer_id.as_deref() == Some(customer_id))
        {
            return Ok(Some(account.clone()));
        }

        let owner = state
            .subscriptions
            .iter()
            .find(|s| s.external_customer_id == customer_id)
            .map(|s| s.user_id.clone());
        Ok(owner.and_then(|user_id| {
            state
                .accounts
                .iter()
                .find(|a| a.user_id == user_id)
                .cloned()
        }))
    }

    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<BillingAccount>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .iter()
            .find(|a| {
                a.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn find_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state.subscriptions.iter().find(|s| &s.user_id == user_id).cloned())
    }

    async fn find_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.external_payment_id == external_payment_id)
            .cloned())
    }

    async fn payments_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn apply(&self, write: BillingWrite) -> Result<ApplyOutcome, DomainError> {
        let mut state = self.state.write().await;

        if let Some(message) = state.fail_next_apply.take() {
            return Err(DomainError::database(message));
        }

        let account_index = state
            .accounts
            .iter()
            .position(|a| a.user_id == write.user_id)
            .ok_or_else(|| {
                DomainError::new(ErrorCode::UserNotFound, "user vanished during reconciliation")
                    .with_detail("user_id", write.user_id.as_str())
            })?;

        let ledger = match write.payment {
            None => LedgerOutcome::Skipped,
            Some(payment) => {
                let exists = state
                    .payments
                    .iter()
                    .any(|p| p.external_payment_id == payment.external_payment_id);
                if exists {
                    LedgerOutcome::Duplicate
                } else {
                    state.payments.push(payment);
                    LedgerOutcome::Recorded
                }
            }
        };

        let subscription = match write.subscription {
            None => SubscriptionOutcome::Skipped,
            Some(incoming) => {
                let existing = state
                    .subscriptions
                    .iter()
                    .position(|s| s.user_id == incoming.user_id);
                match existing {
                    None => {
                        state.subscriptions.push(incoming);
                        SubscriptionOutcome::Applied
                    }
                    Some(index) => {
                        let decision = state.subscriptions[index].decide(&incoming);
                        if decision.is_apply() {
                            state.subscriptions[index] = incoming;
                            SubscriptionOutcome::Applied
                        } else {
                            SubscriptionOutcome::Rejected(decision)
                        }
                    }
                }
            }
        };

        let mut snapshot_updated = false;
        if let Some(snapshot) = write.snapshot {
            if ApplyOutcome::snapshot_allowed(subscription) {
                let account = &mut state.accounts[account_index];
                account.subscription = snapshot.subscription;
                if let Some(credits) = snapshot.credits {
                    account.credits = Some(credits);
                }
                if let Some(customer_id) = snapshot.stripe_customer_id {
                    account.stripe_customer_id = Some(customer_id);
                }
                snapshot_updated = true;
            }
        }

        Ok(ApplyOutcome {
            ledger,
            subscription,
            snapshot_updated,
        })
    }
}
