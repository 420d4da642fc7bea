//! Stripe adapters.
//!
//! - `StripeClient` - REST reads behind the `PaymentProvider` port
//! - `MockPaymentProvider` - in-process double for tests

mod mock_payment_provider;
mod stripe_client;

pub use mock_payment_provider::{MethodCall, MockPaymentProvider};
pub use stripe_client::{StripeClient, StripeConfig, DEFAULT_API_BASE_URL};
