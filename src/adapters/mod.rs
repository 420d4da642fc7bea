//! Adapters - Implementations of the port interfaces.
//!
//! - `memory` - in-process store for tests and local runs
//! - `postgres` - PostgreSQL store
//! - `stripe` - Stripe API client and its test double
//! - `http` - axum router for the webhook endpoint

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use memory::InMemoryBillingStore;
pub use postgres::PostgresBillingStore;
pub use stripe::{MockPaymentProvider, StripeClient, StripeConfig};
