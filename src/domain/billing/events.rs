//! Typed billing events and the classifier that builds them.
//!
//! `classify` is the only place the loosely typed Stripe object is read.
//! Handlers receive one of the closed [`BillingEvent`] variants.

use std::collections::HashMap;

use super::payment::normalize_currency;
use super::stripe_event::{StripeEvent, StripeEventType};
use super::webhook_errors::WebhookError;
use super::wire::{
    Expandable, StripeCheckoutSession, StripeInvoice, StripePaymentIntent, StripeSubscription,
};
use crate::domain::foundation::{Timestamp, UserId};

/// Metadata key the checkout flow uses to pass our user id.
pub const USER_ID_METADATA_KEY: &str = "userId";

/// Metadata key naming the plan on direct payment intents.
pub const PLAN_TYPE_METADATA_KEY: &str = "plan_type";

/// A verified event reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: Timestamp,
    pub livemode: bool,
    pub event: BillingEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionChanged(SubscriptionDetails),
    SubscriptionCanceled(SubscriptionDetails),
    InvoicePaid(InvoiceSettlement),
    InvoiceFailed(InvoiceSettlement),
    PaymentSucceeded(DirectPayment),
    /// Acknowledged without any state change.
    Ignored { reason: String },
}

impl BillingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::CheckoutCompleted(_) => "checkout_completed",
            BillingEvent::SubscriptionChanged(_) => "subscription_changed",
            BillingEvent::SubscriptionCanceled(_) => "subscription_canceled",
            BillingEvent::InvoicePaid(_) => "invoice_paid",
            BillingEvent::InvoiceFailed(_) => "invoice_failed",
            BillingEvent::PaymentSucceeded(_) => "payment_succeeded",
            BillingEvent::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub mode: CheckoutMode,
    /// From `metadata.userId`, else `client_reference_id`.
    pub user_id: Option<UserId>,
    pub customer_id: Option<String>,
    /// From `customer_email`, else `customer_details.email`.
    pub customer_email: Option<String>,
    pub subscription_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub invoice_id: Option<String>,
    pub amount_total: i64,
    pub currency: String,
}

impl CheckoutCompleted {
    /// Ledger key: the payment intent when there is one, so that a matching
    /// `payment_intent.succeeded` dedups against it; otherwise the invoice,
    /// so the first subscription invoice dedups against it.
    pub fn payment_key(&self) -> &str {
        self.payment_intent_id
            .as_deref()
            .or(self.invoice_id.as_deref())
            .unwrap_or(&self.session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Subscription state as reported by the provider, either in an event or
/// fetched from the API.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionDetails {
    pub subscription_id: String,
    pub customer_id: String,
    /// Raw provider status, mapped by the handlers.
    pub provider_status: String,
    pub price_id: Option<String>,
    pub period: BillingPeriod,
    pub cancel_at_period_end: bool,
}

impl TryFrom<StripeSubscription> for SubscriptionDetails {
    type Error = WebhookError;

    fn try_from(sub: StripeSubscription) -> Result<Self, Self::Error> {
        let first_item = sub.items.data.into_iter().next();
        let price_id = first_item
            .as_ref()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.clone());

        let start = sub
            .current_period_start
            .or_else(|| first_item.as_ref().and_then(|i| i.current_period_start))
            .ok_or(WebhookError::MissingField("current_period_start"))?;
        let end = sub
            .current_period_end
            .or_else(|| first_item.as_ref().and_then(|i| i.current_period_end))
            .ok_or(WebhookError::MissingField("current_period_end"))?;

        Ok(SubscriptionDetails {
            subscription_id: sub.id,
            customer_id: sub.customer.into_id(),
            provider_status: sub.status,
            price_id,
            period: BillingPeriod {
                start: unix(start, "current_period_start")?,
                end: unix(end, "current_period_end")?,
            },
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSettlement {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub amount_paid: i64,
    pub amount_due: i64,
    pub currency: String,
    pub attempt_count: u32,
    /// Period of the first line item, when present.
    pub period: Option<BillingPeriod>,
}

impl InvoiceSettlement {
    /// Ledger key for a successful settlement.
    pub fn paid_key(&self) -> String {
        self.invoice_id.clone()
    }

    /// Ledger key for one failed collection attempt.
    pub fn failed_key(&self) -> String {
        format!("{}:failed:{}", self.invoice_id, self.attempt_count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectPayment {
    pub payment_intent_id: String,
    pub customer_id: Option<String>,
    pub user_id: Option<UserId>,
    pub amount: i64,
    pub currency: String,
    pub plan_label: Option<String>,
}

/// Narrows a verified Stripe event into a [`ClassifiedEvent`].
///
/// Unknown event types become [`BillingEvent::Ignored`]. A known type whose
/// object is malformed is an error: redelivering it cannot help.
pub fn classify(event: &StripeEvent) -> Result<ClassifiedEvent, WebhookError> {
    let billing_event = match event.parsed_type() {
        StripeEventType::CheckoutSessionCompleted => classify_checkout(parse(event)?),
        StripeEventType::CustomerSubscriptionCreated
        | StripeEventType::CustomerSubscriptionUpdated => {
            let sub: StripeSubscription = parse(event)?;
            BillingEvent::SubscriptionChanged(sub.try_into()?)
        }
        StripeEventType::CustomerSubscriptionDeleted => {
            let sub: StripeSubscription = parse(event)?;
            BillingEvent::SubscriptionCanceled(sub.try_into()?)
        }
        StripeEventType::InvoicePaymentSucceeded => {
            classify_invoice(parse(event)?, BillingEvent::InvoicePaid)?
        }
        StripeEventType::InvoicePaymentFailed => {
            classify_invoice(parse(event)?, BillingEvent::InvoiceFailed)?
        }
        StripeEventType::PaymentIntentSucceeded => classify_payment_intent(parse(event)?),
        StripeEventType::Unknown => BillingEvent::Ignored {
            reason: format!("unhandled event type {}", event.event_type),
        },
    };

    Ok(ClassifiedEvent {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        occurred_at: unix(event.created, "created")?,
        livemode: event.livemode,
        event: billing_event,
    })
}

fn parse<T: serde::de::DeserializeOwned>(event: &StripeEvent) -> Result<T, WebhookError> {
    event
        .deserialize_object()
        .map_err(|e| WebhookError::ParseError(format!("{}: {}", event.event_type, e)))
}

fn unix(secs: i64, field: &'static str) -> Result<Timestamp, WebhookError> {
    Timestamp::from_unix_secs(secs).ok_or(WebhookError::MissingField(field))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn metadata_value(metadata: &Option<HashMap<String, String>>, key: &str) -> Option<String> {
    non_empty(metadata.as_ref().and_then(|m| m.get(key)).cloned())
}

fn classify_checkout(session: StripeCheckoutSession) -> BillingEvent {
    let mode = match session.mode.as_deref() {
        Some("subscription") => CheckoutMode::Subscription,
        Some("payment") => CheckoutMode::Payment,
        other => {
            return BillingEvent::Ignored {
                reason: format!("checkout mode {}", other.unwrap_or("missing")),
            }
        }
    };

    let user_id = metadata_value(&session.metadata, USER_ID_METADATA_KEY)
        .or_else(|| non_empty(session.client_reference_id.clone()))
        .and_then(|id| UserId::new(id).ok());
    let customer_email = non_empty(session.customer_email)
        .or_else(|| non_empty(session.customer_details.and_then(|d| d.email)));

    BillingEvent::CheckoutCompleted(CheckoutCompleted {
        session_id: session.id,
        mode,
        user_id,
        customer_id: session.customer.map(Expandable::into_id),
        customer_email,
        subscription_id: session.subscription.map(Expandable::into_id),
        payment_intent_id: session.payment_intent.map(Expandable::into_id),
        invoice_id: session.invoice.map(Expandable::into_id),
        amount_total: session.amount_total.unwrap_or(0),
        currency: normalize_currency(session.currency.as_deref()),
    })
}

fn classify_invoice(
    invoice: StripeInvoice,
    variant: fn(InvoiceSettlement) -> BillingEvent,
) -> Result<BillingEvent, WebhookError> {
    let Some(subscription) = invoice.subscription else {
        return Ok(BillingEvent::Ignored {
            reason: format!("invoice {} has no subscription", invoice.id),
        });
    };
    let customer_id = invoice
        .customer
        .map(Expandable::into_id)
        .ok_or(WebhookError::MissingField("customer"))?;

    let period = match invoice.lines.data.first().and_then(|line| line.period.as_ref()) {
        Some(p) => Some(BillingPeriod {
            start: unix(p.start, "lines.period.start")?,
            end: unix(p.end, "lines.period.end")?,
        }),
        None => None,
    };

    Ok(variant(InvoiceSettlement {
        invoice_id: invoice.id,
        customer_id,
        subscription_id: subscription.into_id(),
        amount_paid: invoice.amount_paid,
        amount_due: invoice.amount_due,
        currency: normalize_currency(invoice.currency.as_deref()),
        attempt_count: invoice.attempt_count,
        period,
    }))
}

fn classify_payment_intent(intent: StripePaymentIntent) -> BillingEvent {
    BillingEvent::PaymentSucceeded(DirectPayment {
        user_id: metadata_value(&intent.metadata, USER_ID_METADATA_KEY)
            .and_then(|id| UserId::new(id).ok()),
        plan_label: metadata_value(&intent.metadata, PLAN_TYPE_METADATA_KEY),
        payment_intent_id: intent.id,
        customer_id: intent.customer.map(Expandable::into_id),
        amount: intent.amount,
        currency: normalize_currency(intent.currency.as_deref()),
    })
}
