//! Billing handlers.
//!
//! One reconciler per billing event kind, routed by
//! [`ReconcileWebhookHandler`]. Reconcilers never call one another; events
//! for the same user meet only in the store.

mod checkout_completed;
mod context;
mod invoice_failed;
mod invoice_paid;
mod payment_succeeded;
mod reconcile_webhook;
mod subscription_canceled;
mod subscription_changed;

pub use context::ReconciliationContext;
pub use reconcile_webhook::{ReconcileOutcome, ReconcileWebhookCommand, ReconcileWebhookHandler};
