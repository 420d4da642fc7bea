//! Ports - Interfaces for external dependencies.
//!
//! - `BillingStore` - users, subscriptions and the payment ledger
//! - `PaymentProvider` - read-only detail from the payment provider API

mod billing_store;
mod payment_provider;

pub use billing_store::BillingStore;
pub use payment_provider::{PaymentError, PaymentErrorCode, PaymentProvider};
