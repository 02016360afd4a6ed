//! Analyses of the annotated loop: structure, identifier roles, reduction
//! detection and shared-memory caching.

pub mod cache;
pub mod classify;
pub mod loop_info;
pub mod reduction;

pub use cache::CacheDecision;
pub use classify::{Classification, VariableRole};
pub use loop_info::LoopDescriptor;
pub use reduction::ReductionPlan;
