//! Stripe object shapes, trimmed to the fields reconciliation reads.
//!
//! Shared by the event classifier and the Stripe API client. Nothing past
//! the classifier sees these types.

use std::collections::HashMap;

use serde::Deserialize;

/// A reference that Stripe renders either as a bare id or, when expanded,
/// as the full object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }

    pub fn into_id(self) -> String {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

/// Stripe list envelope (`{"object": "list", "data": [...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub client_reference_id: Option<String>,
    pub customer: Option<Expandable>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub subscription: Option<Expandable>,
    pub payment_intent: Option<Expandable>,
    pub invoice: Option<Expandable>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: Option<StripePrice>,
    /// Newer API versions carry the period on the item.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Expandable,
    pub status: String,
    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoiceLine {
    pub period: Option<StripePeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<Expandable>,
    pub subscription: Option<Expandable>,
    pub payment_intent: Option<Expandable>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub lines: StripeList<StripeInvoiceLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub customer: Option<Expandable>,
    pub amount: i64,
    pub currency: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Entry of `GET /v1/checkout/sessions/{id}/line_items`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeLineItem {
    pub price: Option<StripePrice>,
}
