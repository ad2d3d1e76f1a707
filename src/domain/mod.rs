//! Domain layer types and invariants.

pub mod error;
pub mod jobs;
pub mod types;
