//! Host-side marshaling around a kernel launch.
//!
//! The replacement for the source loop is a single compound statement that
//! allocates a device copy of every kernel parameter, copies inputs over,
//! launches the kernel, copies results back, folds per-block partial
//! results and frees everything it allocated. Copy-ins always precede the
//! launch and copy-outs always follow it.

use crate::analysis::classify::Classification;
use crate::analysis::reduction::ReductionPlan;
use crate::config::{CudaConfig, TimingConfig};
use crate::ir::ast::{AssignOp, BinaryOp, Expr, Stmt, Type, UnaryOp};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::kernel::{KernelSpec, BLOCK_RESULT};

/// Prefix of device copies of host variables.
pub const DEVICE_PREFIX: &str = "dev_";

const GRID: &str = "dimGrid";
const BLOCK: &str = "dimBlock";

/// Grid size needed to cover `extent` iterations with `threads` threads per
/// block, i.e. `ceil(extent / threads)`.
pub fn grid_dim(extent: u64, threads: u32) -> u64 {
    extent.div_ceil(u64::from(threads.max(1)))
}

/// Device copy of a host identifier.
pub fn device_name(name: &str) -> String {
    format!("{}{}", DEVICE_PREFIX, name)
}

/// Phases of the host plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Device pointers, the host block-result buffer and the launch geometry
    DeclareDeviceVars,
    /// `dimGrid` and `dimBlock`
    ComputeGridDims,
    /// `cudaMalloc` of every device variable
    Allocate,
    /// Host-to-device copies of values the kernel reads
    CopyIn,
    /// Event setup and the start marker before the launch, or the stop
    /// marker and the timing record after it
    Timing,
    /// The kernel launch
    Launch,
    /// Device-to-host copies of results
    CopyOut,
    /// Host-side sum of the per-block results
    ReduceAcrossBlocks,
    /// Release of device and host buffers
    Free,
}

impl Phase {
    /// Comment heading the phase in the generated code.
    pub fn heading(&self) -> Option<&'static str> {
        match self {
            Phase::DeclareDeviceVars => Some("declare device variables"),
            Phase::ComputeGridDims => Some("calculate device dimensions"),
            Phase::Allocate => Some("allocate device memory"),
            Phase::CopyIn => Some("copy data from host to devices"),
            Phase::Timing => None,
            Phase::Launch => Some("invoke device kernel function"),
            Phase::CopyOut => Some("copy data from devices to host"),
            Phase::ReduceAcrossBlocks => Some("post-processing on the host"),
            Phase::Free => Some("free device memory"),
        }
    }
}

/// Statements of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Phase the statements belong to
    pub phase: Phase,
    /// Statements in emission order
    pub stmts: Vec<Stmt>,
}

/// The ordered host statement sequence replacing the source loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalPlan {
    sections: Vec<Section>,
    device_vars: Vec<String>,
}

impl MarshalPlan {
    /// Sections in emission order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// All statements of `phase`, in emission order.
    pub fn phase(&self, phase: Phase) -> Vec<&Stmt> {
        self.sections
            .iter()
            .filter(|s| s.phase == phase)
            .flat_map(|s| s.stmts.iter())
            .collect()
    }

    /// Device variables allocated by the plan, in allocation order.
    pub fn device_vars(&self) -> &[String] {
        &self.device_vars
    }

    /// All statements without the phase headings.
    pub fn statements(&self) -> impl Iterator<Item = &Stmt> {
        self.sections.iter().flat_map(|s| s.stmts.iter())
    }

    /// The replacement compound statement, with a comment heading each phase.
    pub fn into_stmt(self) -> Stmt {
        let mut stmts = Vec::new();
        for section in self.sections {
            if let Some(heading) = section.phase.heading() {
                stmts.push(Stmt::comment(heading));
            }
            stmts.extend(section.stmts);
        }
        Stmt::Compound(stmts)
    }
}

/// Builds the host plan for one kernel.
#[derive(Debug)]
pub struct HostPlanner<'a> {
    config: &'a CudaConfig,
    cls: &'a Classification,
    reduction: Option<&'a ReductionPlan>,
    extent: Expr,
}

impl<'a> HostPlanner<'a> {
    /// `extent` is the host-side trip count of the source loop.
    pub fn new(
        config: &'a CudaConfig,
        cls: &'a Classification,
        reduction: Option<&'a ReductionPlan>,
        extent: Expr,
    ) -> Self {
        Self { config, cls, reduction, extent }
    }

    /// Build the host statements marshaling around a launch of `kernel`.
    pub fn plan(&self, kernel: &KernelSpec) -> MarshalPlan {
        // Host names of the kernel's data parameters; the result buffer is
        // handled on its own.
        let host_vars: Vec<&str> = kernel.param_names().filter(|n| *n != BLOCK_RESULT).collect();
        let mut device_vars: Vec<String> = host_vars.iter().map(|n| device_name(n)).collect();
        if self.reduction.is_some() {
            device_vars.push(device_name(BLOCK_RESULT));
        }

        let mut sections = vec![
            Section { phase: Phase::DeclareDeviceVars, stmts: self.declarations(&host_vars) },
            Section { phase: Phase::ComputeGridDims, stmts: self.grid_dims() },
            Section { phase: Phase::Allocate, stmts: self.allocations(&host_vars) },
            Section { phase: Phase::CopyIn, stmts: self.copy_in(&host_vars) },
        ];

        let launch = Section {
            phase: Phase::Launch,
            stmts: vec![Stmt::expr(Expr::Launch {
                kernel: kernel.name.clone(),
                grid: Box::new(Expr::ident(GRID)),
                block: Box::new(Expr::ident(BLOCK)),
                args: device_vars.iter().map(|d| Expr::ident(d)).collect(),
            })],
        };
        if self.config.timing.enabled {
            let (start, stop) = timing(&self.config.timing);
            sections.push(Section { phase: Phase::Timing, stmts: start });
            sections.push(launch);
            sections.push(Section { phase: Phase::Timing, stmts: stop });
        } else {
            sections.push(launch);
        }

        sections.push(Section { phase: Phase::CopyOut, stmts: self.copy_out() });
        sections.push(Section { phase: Phase::ReduceAcrossBlocks, stmts: self.cross_block() });
        sections.push(Section { phase: Phase::Free, stmts: self.frees(&device_vars) });

        debug!(
            "host plan for `{}`: {} device variables, timing {}",
            kernel.name,
            device_vars.len(),
            if self.config.timing.enabled { "on" } else { "off" }
        );
        MarshalPlan { sections, device_vars }
    }

    fn element(&self) -> Type {
        self.config.element_type.clone()
    }

    fn is_bound(&self, name: &str) -> bool {
        self.cls.bound_ids.contains(name)
    }

    /// Bytes occupied by the device copy of `name`.
    fn size_of(&self, name: &str) -> Expr {
        if self.is_bound(name) {
            Expr::SizeOf(self.config.bound_type.clone())
        } else if self.cls.is_array(name) {
            self.extent.clone().mul(Expr::SizeOf(self.element()))
        } else {
            Expr::SizeOf(self.element())
        }
    }

    /// `dimGrid.x * sizeof(double)`
    fn block_result_size(&self) -> Expr {
        Expr::ident(GRID).field("x").mul(Expr::SizeOf(self.element()))
    }

    fn declarations(&self, host_vars: &[&str]) -> Vec<Stmt> {
        let (bound, data): (Vec<&str>, Vec<&str>) =
            host_vars.iter().copied().partition(|n| self.is_bound(n));

        let bound: Vec<String> = bound.iter().map(|n| device_name(n)).collect();
        let mut data: Vec<String> = data.iter().map(|n| device_name(n)).collect();
        if self.reduction.is_some() {
            data.push(device_name(BLOCK_RESULT));
            data.push(BLOCK_RESULT.to_string());
        }

        let mut stmts = Vec::new();
        if !bound.is_empty() {
            stmts.push(decl_names(self.config.bound_type.clone().ptr(), &bound));
        }
        if !data.is_empty() {
            stmts.push(decl_names(self.element().ptr(), &data));
        }
        stmts.push(Stmt::decl(Type::named("dim3"), &[GRID, BLOCK]));
        stmts
    }

    /// `dimGrid.x = ceil((float)extent / (float)T); dimBlock.x = T;`
    fn grid_dims(&self) -> Vec<Stmt> {
        let threads = Expr::int(i64::from(self.config.thread_count));
        let blocks = Expr::call(
            "ceil",
            vec![self
                .extent
                .clone()
                .cast(Type::Float)
                .div(threads.clone().cast(Type::Float))],
        );
        vec![
            Stmt::assign(Expr::ident(GRID).field("x"), blocks),
            Stmt::assign(Expr::ident(BLOCK).field("x"), threads),
        ]
    }

    fn allocations(&self, host_vars: &[&str]) -> Vec<Stmt> {
        let mut stmts: Vec<Stmt> = host_vars
            .iter()
            .map(|n| cuda_malloc(&device_name(n), self.size_of(n)))
            .collect();
        if self.reduction.is_some() {
            stmts.push(cuda_malloc(&device_name(BLOCK_RESULT), self.block_result_size()));
            stmts.push(Stmt::assign(
                Expr::ident(BLOCK_RESULT),
                Expr::call("malloc", vec![self.block_result_size()]).cast(self.element().ptr()),
            ));
        }
        stmts
    }

    /// Bound identifiers always; everything else only if the body reads it.
    fn copy_in(&self, host_vars: &[&str]) -> Vec<Stmt> {
        host_vars
            .iter()
            .filter(|n| self.is_bound(n) || self.cls.read_ids.contains(**n))
            .map(|n| memcpy(Expr::ident(&device_name(n)), self.host_ref(n), self.size_of(n), true))
            .collect()
    }

    fn copy_out(&self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        for name in &self.cls.write_ids {
            if self.reduction.is_some_and(|r| r.is_reduced(name)) {
                continue;
            }
            if !self.cls.is_array(name) {
                warn!(
                    "scalar `{}` is written by every thread; the copied-out value is whichever write landed last",
                    name
                );
            }
            stmts.push(memcpy(self.host_ref(name), Expr::ident(&device_name(name)), self.size_of(name), false));
        }
        if self.reduction.is_some() {
            stmts.push(memcpy(
                Expr::ident(BLOCK_RESULT),
                Expr::ident(&device_name(BLOCK_RESULT)),
                self.block_result_size(),
                false,
            ));
        }
        stmts
    }

    /// `int i; for (i = 0; i < dimGrid.x; i++) s += block_r[i];`
    fn cross_block(&self) -> Vec<Stmt> {
        let Some(plan) = self.reduction else {
            return Vec::new();
        };
        let i = self.cls.index.as_str();
        vec![
            Stmt::decl(Type::Int, &[i]),
            Stmt::For {
                init: Some(Expr::ident(i).assign(Expr::int(0))),
                test: Some(Expr::ident(i).binary(BinaryOp::Lt, Expr::ident(GRID).field("x"))),
                step: Some(Expr::ident(i).unary(UnaryOp::PostInc)),
                body: Box::new(Stmt::expr(Expr::ident(&plan.variable).assign_op(
                    AssignOp::AddAssign,
                    Expr::ident(BLOCK_RESULT).index(Expr::ident(i)),
                ))),
            },
        ]
    }

    fn frees(&self, device_vars: &[String]) -> Vec<Stmt> {
        let mut stmts: Vec<Stmt> = device_vars
            .iter()
            .map(|d| Stmt::call("cudaFree", vec![Expr::ident(d)]))
            .collect();
        if self.reduction.is_some() {
            stmts.push(Stmt::call("free", vec![Expr::ident(BLOCK_RESULT)]));
        }
        stmts
    }

    /// Host-side argument of a copy: arrays by value, scalars by address.
    fn host_ref(&self, name: &str) -> Expr {
        if self.cls.is_array(name) {
            Expr::ident(name)
        } else {
            Expr::ident(name).address_of()
        }
    }
}

fn decl_names(ty: Type, names: &[String]) -> Stmt {
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    Stmt::decl(ty, &names)
}

/// `cudaMalloc((void**)&dev, size);`
fn cuda_malloc(dev: &str, size: Expr) -> Stmt {
    Stmt::call(
        "cudaMalloc",
        vec![Expr::ident(dev).address_of().cast(Type::Void.ptr().ptr()), size],
    )
}

/// `cudaMemcpy(dst, src, size, direction);`
fn memcpy(dst: Expr, src: Expr, size: Expr, to_device: bool) -> Stmt {
    let direction = if to_device { "cudaMemcpyHostToDevice" } else { "cudaMemcpyDeviceToHost" };
    Stmt::call("cudaMemcpy", vec![dst, src, size, Expr::ident(direction)])
}

/// Statements before and after the launch that time it with CUDA events and
/// append the result to the timing log.
fn timing(cfg: &TimingConfig) -> (Vec<Stmt>, Vec<Stmt>) {
    let event = |f: &str, args: Vec<Expr>| Stmt::call(f, args);
    let start = vec![
        Stmt::decl(Type::named("cudaEvent_t"), &["start", "stop"]),
        Stmt::decl(Type::Float, &["orcuda_elapsedTime"]),
        Stmt::decl(Type::named("FILE").ptr(), &["orcuda_fp"]),
        event("cudaEventCreate", vec![Expr::ident("start").address_of()]),
        event("cudaEventCreate", vec![Expr::ident("stop").address_of()]),
        event("cudaEventRecord", vec![Expr::ident("start"), Expr::int(0)]),
    ];
    let stop = vec![
        event("cudaEventRecord", vec![Expr::ident("stop"), Expr::int(0)]),
        event("cudaEventSynchronize", vec![Expr::ident("stop")]),
        event(
            "cudaEventElapsedTime",
            vec![
                Expr::ident("orcuda_elapsedTime").address_of(),
                Expr::ident("start"),
                Expr::ident("stop"),
            ],
        ),
        Stmt::assign(
            Expr::ident("orcuda_fp"),
            Expr::call("fopen", vec![Expr::string(&cfg.log_file), Expr::string("a")]),
        ),
        event(
            "fprintf",
            vec![
                Expr::ident("orcuda_fp"),
                Expr::string(&cfg.label_format),
                Expr::ident(&cfg.rep_var),
                Expr::ident("orcuda_elapsedTime"),
            ],
        ),
        event("cudaEventDestroy", vec![Expr::ident("start")]),
        event("cudaEventDestroy", vec![Expr::ident("stop")]),
        event("fclose", vec![Expr::ident("orcuda_fp")]),
    ];
    (start, stop)
}
