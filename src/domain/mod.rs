//! Domain layer types and invariants.

pub mod error;
pub mod messages;
pub mod types;
