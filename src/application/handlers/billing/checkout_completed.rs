//! `checkout.session.completed`.
//!
//! Resolves the user (explicit id, else email), fetches the detail the
//! event body lacks, then writes the purchase in one unit of work.

use tracing::{debug, warn};

use crate::domain::billing::events::{CheckoutCompleted, CheckoutMode};
use crate::domain::billing::{transitions, BillingAccount, PurchaseKind, WebhookError};
use crate::domain::foundation::Timestamp;
use crate::ports::PaymentError;

use super::{ReconcileOutcome, ReconciliationContext};

pub(super) async fn reconcile(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    checkout: &CheckoutCompleted,
) -> Result<ReconcileOutcome, WebhookError> {
    let Some(account) = resolve_account(ctx, event_id, checkout).await? else {
        let reference = checkout
            .user_id
            .as_ref()
            .map(|id| id.to_string())
            .or_else(|| checkout.customer_email.clone())
            .unwrap_or_else(|| checkout.session_id.clone());
        warn!(
            event_id,
            session_id = %checkout.session_id,
            reference = %reference,
            "no user for checkout session"
        );
        return Ok(ReconcileOutcome::UserNotFound { reference });
    };

    let write = match checkout.mode {
        CheckoutMode::Subscription => {
            let subscription_id = checkout
                .subscription_id
                .as_deref()
                .ok_or(WebhookError::MissingField("subscription"))?;
            let details = ctx
                .provider
                .get_subscription(subscription_id)
                .await?
                .ok_or_else(|| PaymentError::not_found("subscription"))?;

            let tier = ctx.resolve_plan(event_id, details.price_id.as_deref(), PurchaseKind::Recurring);
            let status = ctx.map_status(event_id, &details.provider_status);
            transitions::checkout_subscription(&account, checkout, &details, tier, status, occurred_at)
        }
        CheckoutMode::Payment => {
            let prices = ctx
                .provider
                .list_checkout_price_ids(&checkout.session_id)
                .await?;
            let tier = ctx.resolve_plan(
                event_id,
                prices.first().map(String::as_str),
                PurchaseKind::OneTime,
            );
            transitions::checkout_one_time(&account, checkout, tier, occurred_at)
        }
    };

    ctx.commit(event_id, write).await
}

/// Explicit id when the checkout carries one; email otherwise.
///
/// The email path is best effort. Emails can be reused across accounts and
/// the oldest match wins.
async fn resolve_account(
    ctx: &ReconciliationContext,
    event_id: &str,
    checkout: &CheckoutCompleted,
) -> Result<Option<BillingAccount>, WebhookError> {
    if let Some(user_id) = &checkout.user_id {
        return ctx.account_by_id(user_id).await;
    }

    let Some(email) = checkout.customer_email.as_deref() else {
        return Ok(None);
    };
    debug!(event_id, "checkout has no user id, resolving by email");
    Ok(ctx.store.find_account_by_email(email).await?)
}
