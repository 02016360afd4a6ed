//! Generation of the device kernel and the host marshaling code.

pub mod host;
pub mod kernel;

pub use host::{grid_dim, MarshalPlan, Phase};
pub use kernel::KernelSpec;

use crate::ir::ast::FunDecl;
use serde::{Deserialize, Serialize};

/// Accumulator of kernel declarations produced during a run.
///
/// Kernels are kept in the order they were generated. Structurally identical
/// kernels are never merged: each transformation produces its own entry
/// point under a fresh name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Declarations {
    kernels: Vec<FunDecl>,
}

impl Declarations {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a kernel.
    pub fn push(&mut self, kernel: FunDecl) {
        self.kernels.push(kernel);
    }

    /// Kernels in generation order.
    pub fn iter(&self) -> impl Iterator<Item = &FunDecl> {
        self.kernels.iter()
    }

    /// Number of kernels.
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// Check if no kernel was added.
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// The most recently added kernel.
    pub fn last(&self) -> Option<&FunDecl> {
        self.kernels.last()
    }

    /// Find a kernel by name.
    pub fn get(&self, name: &str) -> Option<&FunDecl> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Take the kernels in generation order.
    pub fn into_vec(self) -> Vec<FunDecl> {
        self.kernels
    }
}
