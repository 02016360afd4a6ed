//! Kernel assembly.
//!
//! A generated kernel has the layout
//!
//! ```text
//! __global__ void orcuda_kern_<n>(int* N, double* a, ..., double* block_r) {
//!   int tid = blockIdx.x * blockDim.x + threadIdx.x;
//!   __shared__ double shared_x[T];            // cache blocking only
//!   double orcuda_var_<m> = 0;                // reductions only
//!   if (tid < (*N)) {
//!     shared_x[threadIdx.x] = x[tid];          // cache loads
//!     ...rewritten body...
//!     y[tid] = shared_y[threadIdx.x];          // cache stores
//!   }
//!   ...block reduction tree...                // reductions only
//! }
//! ```

use crate::analysis::cache::CacheDecision;
use crate::analysis::classify::Classification;
use crate::analysis::reduction::ReductionPlan;
use crate::config::CudaConfig;
use crate::ir::ast::{AssignOp, BinaryOp, Expr, FunDecl, FunQualifier, Param, Stmt, Type};
use crate::transform::body::{thread_in_block, THREAD_ID};
use log::debug;
use serde::{Deserialize, Serialize};

/// Prefix of generated kernel names.
pub const KERNEL_PREFIX: &str = "orcuda_kern_";

/// Per-block partial results of a reduction.
pub const BLOCK_RESULT: &str = "block_r";

/// Block-shared buffer the reduction tree runs over.
pub const REDUCTION_CACHE: &str = "cache";

/// A fully assembled kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Generated kernel name
    pub name: String,
    /// Device pointers in launch-argument order
    pub params: Vec<Param>,
    /// Kernel body
    pub body: Vec<Stmt>,
}

impl KernelSpec {
    /// Parameter names in launch order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// The `__global__ void` function declaration.
    pub fn to_decl(&self) -> FunDecl {
        FunDecl {
            name: self.name.clone(),
            return_type: Type::Void,
            qualifiers: vec![FunQualifier::Global],
            params: self.params.clone(),
            body: self.body.clone(),
        }
    }
}

/// Kernel parameters, in order: bound identifiers, the remaining body
/// identifiers that are not reduced, and the per-block result buffer when
/// reducing. Every parameter is a pointer.
pub fn parameters(
    cls: &Classification,
    reduction: Option<&ReductionPlan>,
    config: &CudaConfig,
) -> Vec<Param> {
    let mut params: Vec<Param> = cls
        .bound_ids
        .iter()
        .map(|name| Param { ty: config.bound_type.clone().ptr(), name: name.clone() })
        .collect();

    params.extend(
        cls.body_ids
            .iter()
            .filter(|name| !cls.bound_ids.contains(*name))
            .filter(|name| !reduction.is_some_and(|r| r.is_reduced(name)))
            .map(|name| Param { ty: config.element_type.clone().ptr(), name: name.clone() }),
    );

    if reduction.is_some() {
        params.push(Param {
            ty: config.element_type.clone().ptr(),
            name: BLOCK_RESULT.to_string(),
        });
    }
    params
}

/// Builds the kernel for one analysed loop.
#[derive(Debug)]
pub struct KernelAssembler<'a> {
    config: &'a CudaConfig,
    cls: &'a Classification,
    reduction: Option<&'a ReductionPlan>,
    cache: &'a [CacheDecision],
}

impl<'a> KernelAssembler<'a> {
    /// Assembler for one analyzed loop.
    pub fn new(
        config: &'a CudaConfig,
        cls: &'a Classification,
        reduction: Option<&'a ReductionPlan>,
        cache: &'a [CacheDecision],
    ) -> Self {
        Self { config, cls, reduction, cache }
    }

    /// Assemble the kernel around an already rewritten body.
    ///
    /// `bound_op` and `bound` are the comparator and the dereferenced upper
    /// bound of the source loop; the guard reproduces them verbatim.
    pub fn assemble(&self, name: String, body: Stmt, bound_op: BinaryOp, bound: Expr) -> KernelSpec {
        let mut stmts = vec![thread_id_decl()];
        stmts.extend(self.shared_decls());
        if let Some(plan) = self.reduction {
            stmts.push(Stmt::decl_init(self.config.element_type.clone(), &plan.temp, Expr::int(0)));
        }
        stmts.push(self.guarded(body, bound_op, bound));
        if let Some(plan) = self.reduction {
            stmts.extend(self.block_reduction(&plan.temp));
        }

        let params = parameters(self.cls, self.reduction, self.config);
        debug!(
            "kernel `{}` with {} parameters and {} cached arrays",
            name,
            params.len(),
            self.cache.len()
        );
        KernelSpec { name, params, body: stmts }
    }

    fn shared_decls(&self) -> impl Iterator<Item = Stmt> + '_ {
        self.cache.iter().map(|d| {
            Stmt::shared_array(
                self.config.element_type.clone(),
                &d.shared,
                u64::from(self.config.thread_count),
            )
        })
    }

    /// `if (tid op bound) { loads; body; stores }`
    fn guarded(&self, body: Stmt, bound_op: BinaryOp, bound: Expr) -> Stmt {
        let mut inner = Vec::new();
        for d in self.cache.iter().filter(|d| d.read_cached) {
            inner.push(Stmt::assign(shared_slot(&d.shared), global_slot(&d.array)));
        }
        match body {
            Stmt::Compound(stmts) => inner.extend(stmts),
            other => inner.push(other),
        }
        for d in self.cache.iter().filter(|d| d.write_cached) {
            inner.push(Stmt::assign(global_slot(&d.array), shared_slot(&d.shared)));
        }

        let condition = Expr::ident(THREAD_ID).binary(bound_op, bound);
        Stmt::if_then(condition, Stmt::Compound(inner))
    }

    /// Tree reduction of the per-thread temporaries of one block into
    /// `block_r[blockIdx.x]`.
    ///
    /// The span variable reuses the loop index name, which no longer occurs
    /// in the kernel once the body is rewritten.
    fn block_reduction(&self, temp: &str) -> Vec<Stmt> {
        let span = self.cls.index.as_str();
        let cache_at = |e: Expr| Expr::ident(REDUCTION_CACHE).index(e);

        let halving_step = Stmt::Compound(vec![
            Stmt::if_then(
                thread_in_block().binary(BinaryOp::Lt, Expr::ident(span)),
                Stmt::expr(cache_at(thread_in_block()).assign_op(
                    AssignOp::AddAssign,
                    cache_at(thread_in_block().add(Expr::ident(span))),
                )),
            ),
            barrier(),
            Stmt::assign(Expr::ident(span), Expr::ident(span).div(Expr::int(2))),
        ]);

        vec![
            Stmt::comment("reduce single-thread results within a block"),
            Stmt::shared_array(
                self.config.element_type.clone(),
                REDUCTION_CACHE,
                u64::from(self.config.thread_count),
            ),
            Stmt::assign(cache_at(thread_in_block()), Expr::ident(temp)),
            barrier(),
            Stmt::decl(Type::Int, &[span]),
            Stmt::assign(
                Expr::ident(span),
                Expr::ident("blockDim").field("x").div(Expr::int(2)),
            ),
            Stmt::While {
                condition: Expr::ident(span).binary(BinaryOp::Ne, Expr::int(0)),
                body: Box::new(halving_step),
            },
            Stmt::if_then(
                thread_in_block().binary(BinaryOp::Eq, Expr::int(0)),
                Stmt::assign(
                    Expr::ident(BLOCK_RESULT).index(Expr::ident("blockIdx").field("x")),
                    cache_at(Expr::int(0)),
                ),
            ),
        ]
    }
}

/// `int tid = blockIdx.x * blockDim.x + threadIdx.x;`
fn thread_id_decl() -> Stmt {
    let global = Expr::ident("blockIdx")
        .field("x")
        .mul(Expr::ident("blockDim").field("x"))
        .add(thread_in_block());
    Stmt::decl_init(Type::Int, THREAD_ID, global)
}

fn barrier() -> Stmt {
    Stmt::call("__syncthreads", vec![])
}

fn shared_slot(shared: &str) -> Expr {
    Expr::ident(shared).index(thread_in_block())
}

fn global_slot(array: &str) -> Expr {
    Expr::ident(array).index(Expr::ident(THREAD_ID))
}
