//! # loopcuda - loop-to-CUDA-kernel transformation
//!
//! Rewrites an annotated sequential `for` loop into:
//! - a `__global__` kernel in which every thread executes one iteration,
//!   appended to a [`codegen::Declarations`] accumulator, and
//! - a host statement that replaces the loop: device allocation, copies,
//!   the launch, cross-block reduction and deallocation.
//!
//! The crate works on an in-memory syntax tree ([`ir::ast`]). Parsing and
//! printing source text belong to the surrounding compiler.
//!
//! ## Architecture
//!
//! ```text
//! Stmt → LoopDescriptor → Classification → ReductionPlan/CacheDecision
//!      → BodyRewriter → KernelAssembler + HostPlanner
//! ```
//!
//! ## Example
//!
//! ```rust
//! use loopcuda::prelude::*;
//!
//! // for (i = 0; i < N; i++) s = s + x[i];
//! let sum = Stmt::For {
//!     init: Some(Expr::ident("i").assign(Expr::int(0))),
//!     test: Some(Expr::ident("i").binary(BinaryOp::Lt, Expr::ident("N"))),
//!     step: Some(Expr::ident("i").unary(UnaryOp::PostInc)),
//!     body: Box::new(Stmt::assign(
//!         Expr::ident("s"),
//!         Expr::ident("s").add(Expr::ident("x").index(Expr::ident("i"))),
//!     )),
//! };
//!
//! let names = NameGenerator::new();
//! let mut decls = Declarations::new();
//! let host = CudaTransform::new(CudaConfig::default())
//!     .apply(&sum, &names, &mut decls)
//!     .unwrap();
//!
//! assert_eq!(decls.len(), 1);
//! assert!(matches!(host, Stmt::Compound(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod codegen;
pub mod config;
pub mod ir;
pub mod transform;
pub mod utils;

/// Re-exports of commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{
        CacheDecision, Classification, LoopDescriptor, ReductionPlan, VariableRole,
    };
    pub use crate::codegen::{grid_dim, Declarations, KernelSpec, MarshalPlan, Phase};
    pub use crate::config::{CudaConfig, DeviceProps, TimingConfig};
    pub use crate::ir::ast::*;
    pub use crate::transform::{CudaTransform, LoopTransform, Lowered};
    pub use crate::utils::errors::*;
    pub use crate::utils::names::NameGenerator;
}

use codegen::Declarations;
use config::CudaConfig;
use ir::ast::Stmt;
use transform::{CudaTransform, LoopTransform};
use utils::errors::TransformResult;
use utils::names::NameGenerator;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Transform one loop with the process-wide name generator.
///
/// The kernel is appended to `decls`; the returned statement replaces the
/// loop. On error nothing is appended and the caller keeps the original loop.
pub fn transform_loop(
    stmt: &Stmt,
    config: &CudaConfig,
    decls: &mut Declarations,
) -> TransformResult<Stmt> {
    CudaTransform::new(config.clone()).apply(stmt, NameGenerator::global(), decls)
}
