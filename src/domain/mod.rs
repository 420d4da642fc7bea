//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `billing` - Plans, subscription state, payment ledger, webhook boundary

pub mod billing;
pub mod foundation;
