//! `customer.subscription.deleted`, and updates that report `canceled`.

use crate::domain::billing::events::SubscriptionDetails;
use crate::domain::billing::{transitions, BillingAccount, PlanTier, PurchaseKind, WebhookError};
use crate::domain::foundation::Timestamp;

use super::context::missing_user;
use super::{ReconcileOutcome, ReconciliationContext};

pub(super) async fn reconcile(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    details: &SubscriptionDetails,
) -> Result<ReconcileOutcome, WebhookError> {
    let Some(account) = ctx.account_by_customer(&details.customer_id).await? else {
        return Ok(missing_user(event_id, "subscription_canceled", &details.customer_id));
    };

    let tier = ctx.resolve_plan(event_id, details.price_id.as_deref(), PurchaseKind::Recurring);
    cancel(ctx, event_id, occurred_at, &account, details, tier).await
}

pub(super) async fn cancel(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    account: &BillingAccount,
    details: &SubscriptionDetails,
    event_tier: PlanTier,
) -> Result<ReconcileOutcome, WebhookError> {
    let current = ctx.store.find_subscription(&account.user_id).await?;
    let write =
        transitions::subscription_canceled(account, details, current.as_ref(), event_tier, occurred_at);
    ctx.commit(event_id, write).await
}
