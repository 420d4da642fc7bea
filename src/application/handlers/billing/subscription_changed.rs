//! `customer.subscription.created` and `customer.subscription.updated`.

use crate::domain::billing::events::SubscriptionDetails;
use crate::domain::billing::{transitions, PurchaseKind, SubscriptionStatus, WebhookError};
use crate::domain::foundation::Timestamp;

use super::context::missing_user;
use super::{subscription_canceled, ReconcileOutcome, ReconciliationContext};

pub(super) async fn reconcile(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    details: &SubscriptionDetails,
) -> Result<ReconcileOutcome, WebhookError> {
    // The customer id is known here; email is never consulted.
    let Some(account) = ctx.account_by_customer(&details.customer_id).await? else {
        return Ok(missing_user(event_id, "subscription_changed", &details.customer_id));
    };

    let status = ctx.map_status(event_id, &details.provider_status);
    let tier = ctx.resolve_plan(event_id, details.price_id.as_deref(), PurchaseKind::Recurring);

    if status == SubscriptionStatus::Canceled {
        return subscription_canceled::cancel(ctx, event_id, occurred_at, &account, details, tier)
            .await;
    }

    let write = transitions::subscription_changed(&account, details, tier, status);
    ctx.commit(event_id, write).await
}
