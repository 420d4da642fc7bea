//! Billing domain - plans, subscription state, the payment ledger and the
//! Stripe webhook boundary.
//!
//! # Flow
//!
//! raw body → [`StripeWebhookVerifier`] → [`classify`] → handler →
//! [`transitions`] → [`BillingWrite`] applied by a store.

mod account;
mod entitlement;
pub mod events;
mod payment;
mod plan;
mod status;
mod stripe_event;
mod subscription;
pub mod transitions;
mod unit_of_work;
mod webhook_errors;
mod webhook_verifier;
pub mod wire;

pub use account::BillingAccount;
pub use entitlement::{CreditAllotment, UserSubscription, FREE_CREDITS, PAID_CREDITS};
pub use events::{
    classify, BillingEvent, BillingPeriod, CheckoutCompleted, CheckoutMode, ClassifiedEvent,
    DirectPayment, InvoiceSettlement, SubscriptionDetails,
};
pub use payment::{normalize_currency, LedgerPlan, PaymentRecord, PaymentStatus, DEFAULT_CURRENCY};
pub use plan::{PlanMapper, PlanResolution, PlanTableError, PlanTier, PurchaseKind};
pub use status::{StatusResolution, SubscriptionStatus};
pub use stripe_event::{StripeEvent, StripeEventData, StripeEventType};
pub use subscription::{SubscriptionRecord, UpsertDecision};
pub use unit_of_work::{
    ApplyOutcome, BillingWrite, LedgerOutcome, SnapshotUpdate, SubscriptionOutcome,
};
pub use webhook_errors::WebhookError;
pub use webhook_verifier::{
    sign_payload, SignatureHeader, StripeWebhookVerifier, DEFAULT_TOLERANCE_SECS,
};
