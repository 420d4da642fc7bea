//! `payment_intent.succeeded`. Ledger only.
//!
//! Checkout sessions key their ledger entry by payment intent, so an intent
//! that settled a checkout finds its entry already written.

use tracing::debug;

use crate::domain::billing::events::DirectPayment;
use crate::domain::billing::{
    transitions, ApplyOutcome, LedgerOutcome, SubscriptionOutcome, WebhookError,
};
use crate::domain::foundation::Timestamp;

use super::context::missing_user;
use super::{ReconcileOutcome, ReconciliationContext};

pub(super) async fn reconcile(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    payment: &DirectPayment,
) -> Result<ReconcileOutcome, WebhookError> {
    let Some(user_id) = &payment.user_id else {
        return Ok(ReconcileOutcome::Ignored {
            reason: format!("payment intent {} carries no user id", payment.payment_intent_id),
        });
    };

    if let Some(existing) = ctx.store.find_payment(&payment.payment_intent_id).await? {
        debug!(
            event_id,
            payment_intent_id = %payment.payment_intent_id,
            recorded_for = %existing.user_id,
            "payment intent already in ledger"
        );
        return Ok(ReconcileOutcome::Applied {
            user_id: existing.user_id,
            outcome: ApplyOutcome {
                ledger: LedgerOutcome::Duplicate,
                subscription: SubscriptionOutcome::Skipped,
                snapshot_updated: false,
            },
        });
    }

    if ctx.account_by_id(user_id).await?.is_none() {
        return Ok(missing_user(event_id, "payment_succeeded", user_id.as_str()));
    }

    let write = transitions::direct_payment(user_id, payment, occurred_at);
    ctx.commit(event_id, write).await
}
