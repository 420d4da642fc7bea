//! Dependencies shared by the per-event reconcilers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::billing::{
    ApplyOutcome, BillingAccount, BillingWrite, LedgerOutcome, PlanMapper, PlanTier,
    PurchaseKind, SubscriptionOutcome, SubscriptionStatus, WebhookError,
};
use crate::domain::foundation::UserId;
use crate::ports::{BillingStore, PaymentProvider};

use super::ReconcileOutcome;

/// Clients constructed once at start-up and passed to every reconciler.
#[derive(Clone)]
pub struct ReconciliationContext {
    pub store: Arc<dyn BillingStore>,
    pub provider: Arc<dyn PaymentProvider>,
    pub plans: Arc<PlanMapper>,
}

impl ReconciliationContext {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn PaymentProvider>,
        plans: Arc<PlanMapper>,
    ) -> Self {
        Self {
            store,
            provider,
            plans,
        }
    }

    /// Resolves a price to a tier, warning when the fallback is used.
    pub(super) fn resolve_plan(
        &self,
        event_id: &str,
        price_id: Option<&str>,
        kind: PurchaseKind,
    ) -> PlanTier {
        let resolution = self.plans.resolve(price_id, kind);
        if !resolution.mapped {
            warn!(
                event_id,
                price_id = price_id.unwrap_or("<none>"),
                fallback = %resolution.tier,
                "unmapped price, using fallback tier"
            );
        }
        resolution.tier
    }

    /// Maps a provider status, warning when it is not recognised.
    pub(super) fn map_status(&self, event_id: &str, provider_status: &str) -> SubscriptionStatus {
        let resolution = SubscriptionStatus::from_provider(provider_status);
        if !resolution.recognized {
            warn!(
                event_id,
                provider_status,
                mapped = %resolution.status,
                "unknown provider subscription status"
            );
        }
        resolution.status
    }

    pub(super) async fn account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<BillingAccount>, WebhookError> {
        Ok(self.store.find_account_by_customer(customer_id).await?)
    }

    pub(super) async fn account_by_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<BillingAccount>, WebhookError> {
        Ok(self.store.find_account(user_id).await?)
    }

    /// Hands a write to the store and logs what it changed.
    pub(super) async fn commit(
        &self,
        event_id: &str,
        write: BillingWrite,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let user_id = write.user_id.clone();
        let outcome = self.store.apply(write).await?;
        log_outcome(event_id, &user_id, &outcome);
        Ok(ReconcileOutcome::Applied { user_id, outcome })
    }
}

fn log_outcome(event_id: &str, user_id: &UserId, outcome: &ApplyOutcome) {
    if outcome.ledger == LedgerOutcome::Duplicate {
        debug!(event_id, user_id = %user_id, "payment already in ledger");
    }
    match outcome.subscription {
        SubscriptionOutcome::Rejected(decision) => warn!(
            event_id,
            user_id = %user_id,
            decision = decision.as_str(),
            "subscription write rejected by guard, snapshot skipped"
        ),
        _ => info!(
            event_id,
            user_id = %user_id,
            ledger = ?outcome.ledger,
            snapshot_updated = outcome.snapshot_updated,
            "billing event applied"
        ),
    }
}

/// Acknowledges an event whose user cannot be found. Redelivery would not
/// create the missing mapping, so this is not an error.
pub(super) fn missing_user(event_id: &str, kind: &str, reference: &str) -> ReconcileOutcome {
    warn!(event_id, kind, reference, "no user for billing event");
    ReconcileOutcome::UserNotFound {
        reference: reference.to_string(),
    }
}
