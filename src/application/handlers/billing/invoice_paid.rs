//! `invoice.payment_succeeded`.

use tracing::debug;

use crate::domain::billing::events::InvoiceSettlement;
use crate::domain::billing::{transitions, WebhookError};
use crate::domain::foundation::Timestamp;

use super::context::missing_user;
use super::{ReconcileOutcome, ReconciliationContext};

pub(super) async fn reconcile(
    ctx: &ReconciliationContext,
    event_id: &str,
    occurred_at: Timestamp,
    invoice: &InvoiceSettlement,
) -> Result<ReconcileOutcome, WebhookError> {
    let Some(account) = ctx.account_by_customer(&invoice.customer_id).await? else {
        return Ok(missing_user(event_id, "invoice_paid", &invoice.customer_id));
    };

    let current = ctx.store.find_subscription(&account.user_id).await?;
    if current
        .as_ref()
        .map_or(true, |row| row.external_subscription_id != invoice.subscription_id)
    {
        debug!(
            event_id,
            invoice_id = %invoice.invoice_id,
            subscription_id = %invoice.subscription_id,
            "no stored row for invoice subscription, recording ledger entry only"
        );
    }

    let write = transitions::invoice_paid(&account, invoice, current.as_ref(), occurred_at);
    ctx.commit(event_id, write).await
}
