//! HTTP adapter for the Stripe webhook.
//!
//! - `POST /webhooks/stripe` - Reconcile a signed Stripe event
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{WebhookAppState, SIGNATURE_HEADER};
pub use routes::{webhook_router, webhook_routes};
