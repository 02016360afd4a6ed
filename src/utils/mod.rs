//! Utilities shared across the crate.

pub mod errors;
pub mod names;

// Re-exports
pub use errors::*;
pub use names::NameGenerator;
