//! Foundation module - Shared domain primitives.
//!
//! Identifiers, timestamps, error types and the state machine trait used by
//! the billing domain.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::UserId;
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
