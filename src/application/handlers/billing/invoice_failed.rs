//! `invoice.payment_failed`.

use tracing::info;

use crate::domain::billing::events::InvoiceSettlement;
use crate::domain::billing::{transitions, PaymentStatus, WebhookError};
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
        return Ok(missing_user(event_id, "invoice_failed", &invoice.customer_id));
    };

    let settled = ctx
        .store
        .find_payment(&invoice.paid_key())
        .await?
        .is_some_and(|paid| paid.status == PaymentStatus::Succeeded);
    if settled {
        info!(
            event_id,
            invoice_id = %invoice.invoice_id,
            "invoice already paid, failed attempt recorded without demotion"
        );
    }

    let current = ctx.store.find_subscription(&account.user_id).await?;
    let write =
        transitions::invoice_failed(&account, invoice, current.as_ref(), settled, occurred_at);
    ctx.commit(event_id, write).await
}
