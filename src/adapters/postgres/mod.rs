//! PostgreSQL adapters.
//!
//! - `PostgresBillingStore` - users, subscriptions and the payment ledger

mod billing_store;

pub use billing_store::PostgresBillingStore;
