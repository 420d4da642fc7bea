//! Billing Reconciler - Stripe webhook reconciliation engine
//!
//! Converges at-least-once, possibly reordered Stripe webhook deliveries into
//! a consistent per-user subscription record and an append-only payment
//! ledger.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
