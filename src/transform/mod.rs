//! Loop-to-kernel transformation.
//!
//! [`CudaTransform`] drives the whole pipeline for one annotated loop:
//!
//! ```text
//! Stmt -> LoopDescriptor -> Classification -> ReductionPlan / CacheDecision
//!      -> rewritten body -> KernelSpec (appended to Declarations)
//!                        -> MarshalPlan (returned in place of the loop)
//! ```

pub mod body;

pub use body::{BodyRewriter, THREAD_ID};

use crate::analysis::cache::{self, CacheDecision};
use crate::analysis::classify::Classification;
use crate::analysis::loop_info::LoopDescriptor;
use crate::analysis::reduction::{self, ReductionPlan};
use crate::codegen::host::{HostPlanner, MarshalPlan};
use crate::codegen::kernel::{KernelAssembler, KernelSpec, KERNEL_PREFIX};
use crate::codegen::Declarations;
use crate::config::CudaConfig;
use crate::ir::ast::Stmt;
use crate::utils::errors::{TransformError, TransformResult};
use crate::utils::names::NameGenerator;
use log::{debug, info};

/// Identifiers the generated code declares or relies on.
const RESERVED: &[&str] = &[
    THREAD_ID,
    "cache",
    "block_r",
    "dimGrid",
    "dimBlock",
    "threadIdx",
    "blockIdx",
    "blockDim",
    "start",
    "stop",
];

/// Prefixes of generated identifiers.
const RESERVED_PREFIXES: &[&str] = &["dev_", "shared_", "orcuda_"];

/// A transformation that replaces one loop statement.
pub trait LoopTransform {
    /// Transform `stmt`, appending any generated functions to `decls`, and
    /// return the statement that replaces it.
    fn apply(
        &self,
        stmt: &Stmt,
        names: &NameGenerator,
        decls: &mut Declarations,
    ) -> TransformResult<Stmt>;

    /// Check if the transformation accepts `stmt`.
    fn is_legal(&self, stmt: &Stmt) -> bool;

    /// Get transformation name.
    fn name(&self) -> &str;
}

/// Everything learned about a loop before any code is generated.
#[derive(Debug, Clone)]
pub struct LoopAnalysis {
    /// Decomposed loop header and body
    pub descriptor: LoopDescriptor,
    /// Identifier roles
    pub classification: Classification,
    /// Reduction variable and its temporary, if the loop is a reduction
    pub reduction: Option<ReductionPlan>,
    /// Arrays staged through shared memory
    pub cache: Vec<CacheDecision>,
}

/// Kernel and host plan for one loop.
#[derive(Debug, Clone)]
pub struct Lowered {
    /// Analysis the code was generated from
    pub analysis: LoopAnalysis,
    /// The device kernel
    pub kernel: KernelSpec,
    /// Host statements replacing the loop
    pub plan: MarshalPlan,
}

/// Rewrites a sequential loop into a CUDA kernel launch.
#[derive(Debug, Clone, Default)]
pub struct CudaTransform {
    config: CudaConfig,
}

impl CudaTransform {
    /// Transform with the given parameters.
    pub fn new(config: CudaConfig) -> Self {
        Self { config }
    }

    /// Parameters of this transform.
    pub fn config(&self) -> &CudaConfig {
        &self.config
    }

    /// Decompose and classify the loop, and decide reduction and caching.
    ///
    /// Draws one name from `names` when the loop is a reduction.
    pub fn analyze(&self, stmt: &Stmt, names: &NameGenerator) -> TransformResult<LoopAnalysis> {
        self.config.validate()?;

        let descriptor = LoopDescriptor::extract(stmt)?;
        debug!(
            "loop over `{}` with bound `{} {}`",
            descriptor.index, descriptor.bound_op, descriptor.upper
        );

        let classification = Classification::of(&descriptor)?;
        check_reserved(&descriptor, &classification)?;
        debug!(
            "{} bound, {} body identifiers ({} arrays, {} written)",
            classification.bound_ids.len(),
            classification.body_ids.len(),
            classification.array_ids.len(),
            classification.write_ids.len()
        );

        let reduction = reduction::detect(&classification, &descriptor.body, names)?;
        if reduction.is_some() {
            self.config.check_reduction_block()?;
        }
        let cache = cache::decide(&classification, &descriptor.body, self.config.cache_blocks);
        self.config
            .check_shared_memory(cache.len() + usize::from(reduction.is_some()))?;

        Ok(LoopAnalysis { descriptor, classification, reduction, cache })
    }

    /// Produce the kernel and the host plan without registering the kernel.
    pub fn lower(&self, stmt: &Stmt, names: &NameGenerator) -> TransformResult<Lowered> {
        let analysis = self.analyze(stmt, names)?;
        let LoopAnalysis { descriptor, classification: cls, reduction, cache } = &analysis;

        let rewriter = BodyRewriter::new(cls, reduction.as_ref(), cache);
        let rewritten = rewriter.rewrite(&descriptor.body);
        let bound = body::dereference_bound(&descriptor.upper, &cls.bound_ids);

        let kernel = KernelAssembler::new(&self.config, cls, reduction.as_ref(), cache).assemble(
            names.fresh(KERNEL_PREFIX),
            rewritten,
            descriptor.bound_op,
            bound,
        );
        let plan = HostPlanner::new(&self.config, cls, reduction.as_ref(), descriptor.extent())
            .plan(&kernel);

        Ok(Lowered { analysis, kernel, plan })
    }
}

impl LoopTransform for CudaTransform {
    fn apply(
        &self,
        stmt: &Stmt,
        names: &NameGenerator,
        decls: &mut Declarations,
    ) -> TransformResult<Stmt> {
        let Lowered { kernel, plan, analysis } = self.lower(stmt, names)?;
        info!(
            "generated `{}` ({}{} threads per block{})",
            kernel.name,
            if analysis.reduction.is_some() { "reduction, " } else { "" },
            self.config.thread_count,
            if analysis.cache.is_empty() { "" } else { ", cache blocked" }
        );
        decls.push(kernel.to_decl());
        Ok(plan.into_stmt())
    }

    fn is_legal(&self, stmt: &Stmt) -> bool {
        // A scratch generator keeps the shared counter untouched.
        self.analyze(stmt, &NameGenerator::new()).is_ok()
    }

    fn name(&self) -> &str {
        "cuda"
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name) || RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn check_reserved(desc: &LoopDescriptor, cls: &Classification) -> TransformResult<()> {
    let clash = std::iter::once(&desc.index)
        .chain(cls.roles.keys())
        .chain(cls.locals.iter())
        .find(|name| is_reserved(name));
    match clash {
        Some(name) => Err(TransformError::unsupported(
            "identifier collides with a name used by the generated code",
            &desc.body,
        )
        .with_ident(name)),
        None => Ok(()),
    }
}
