//! The billing-relevant slice of a user record.

use serde::{Deserialize, Serialize};

use super::{CreditAllotment, UserSubscription};
use crate::domain::foundation::UserId;

/// User as seen by reconciliation. Identity fields belong to the signup
/// system and are read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub user_id: UserId,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub subscription: UserSubscription,
    pub credits: Option<CreditAllotment>,
}

impl BillingAccount {
    /// A freshly signed-up account with no purchases.
    pub fn new(user_id: UserId, email: Option<String>) -> Self {
        Self {
            user_id,
            email,
            stripe_customer_id: None,
            subscription: UserSubscription::free(),
            credits: None,
        }
    }

    pub fn with_stripe_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.stripe_customer_id = Some(customer_id.into());
        self
    }
}
