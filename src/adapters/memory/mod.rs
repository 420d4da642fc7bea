//! In-memory adapters.

mod billing_store;

pub use billing_store::InMemoryBillingStore;
