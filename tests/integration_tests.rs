//! Integration tests for the loop-to-kernel pipeline.

use loopcuda::analysis::cache::SHARED_PREFIX;
use loopcuda::codegen::host::DEVICE_PREFIX;
use loopcuda::ir::visit::collect_stmt;
use loopcuda::prelude::*;
use loopcuda::transform::body::substitute_index;
use loopcuda::transform::THREAD_ID;
use loopcuda::transform_loop;

fn at(a: &str) -> Expr {
    Expr::ident(a).index(Expr::ident("i"))
}

/// `for (i = 0; i <= N - 1; i++) body`
fn inclusive_loop(body: Stmt) -> Stmt {
    Stmt::For {
        init: Some(Expr::ident("i").assign(Expr::int(0))),
        test: Some(Expr::ident("i").binary(BinaryOp::Le, Expr::ident("N").sub(Expr::int(1)))),
        step: Some(Expr::ident("i").unary(UnaryOp::PostInc)),
        body: Box::new(Stmt::Compound(vec![body])),
    }
}

fn axpy() -> Stmt {
    inclusive_loop(Stmt::assign(at("y"), Expr::ident("a").mul(at("x")).add(at("y"))))
}

fn sum() -> Stmt {
    inclusive_loop(Stmt::assign(Expr::ident("s"), Expr::ident("s").add(at("x"))))
}

fn lower(stmt: &Stmt, config: CudaConfig) -> Lowered {
    CudaTransform::new(config)
        .lower(stmt, &NameGenerator::new())
        .expect("transformation failed")
}

fn calls(stmts: &[Stmt], function: &str) -> usize {
    collect_stmt(&Stmt::Compound(stmts.to_vec()), |e| match e {
        Expr::Call { function: f, .. } if f == function => Some(()),
        _ => None,
    })
    .len()
}

fn count_stmts(stmts: &[Stmt], pred: &dyn Fn(&Stmt) -> bool) -> usize {
    stmts
        .iter()
        .map(|s| {
            let nested = match s {
                Stmt::Compound(inner) => count_stmts(inner, pred),
                Stmt::If { then_branch, .. } => count_stmts(std::slice::from_ref(then_branch), pred),
                Stmt::While { body, .. } | Stmt::For { body, .. } => {
                    count_stmts(std::slice::from_ref(body), pred)
                }
                _ => 0,
            };
            nested + usize::from(pred(s))
        })
        .sum()
}

#[test]
fn test_axpy_end_to_end() {
    let out = lower(&axpy(), CudaConfig::default().with_thread_count(128));
    let k = &out.kernel;

    assert_eq!(k.param_names().collect::<Vec<_>>(), vec!["N", "y", "a", "x"]);
    assert!(out.analysis.reduction.is_none());
    assert_eq!(
        k.body[1].to_string(),
        "if (tid <= (*N) - 1) { y[tid] = (*a) * x[tid] + y[tid]; }"
    );
    assert_eq!(calls(&k.body, "__syncthreads"), 0);
    assert!(!k.param_names().any(|p| p == "block_r"));

    let copy_in: Vec<String> = out.plan.phase(Phase::CopyIn).iter().map(|s| s.to_string()).collect();
    assert_eq!(copy_in.len(), 4);
    for name in ["N", "a", "x", "y"] {
        assert!(
            copy_in.iter().any(|s| s.starts_with(&format!("cudaMemcpy({}{},", DEVICE_PREFIX, name))),
            "{} is not copied in",
            name
        );
    }
    let copy_out: Vec<String> = out.plan.phase(Phase::CopyOut).iter().map(|s| s.to_string()).collect();
    assert_eq!(copy_out, vec!["cudaMemcpy(y, dev_y, N * sizeof(double), cudaMemcpyDeviceToHost);"]);
    assert!(out.plan.phase(Phase::ReduceAcrossBlocks).is_empty());

    // <= N - 1 sizes the grid by N
    assert_eq!(
        out.plan.phase(Phase::ComputeGridDims)[0].to_string(),
        "dimGrid.x = ceil((float)N / (float)128);"
    );
}

#[test]
fn test_axpy_cached() {
    let out = lower(&axpy(), CudaConfig::cached(128));
    let rendered: Vec<String> = out.kernel.body.iter().map(|s| s.to_string()).collect();
    assert_eq!(rendered[1], "__shared__ double shared_y[128];");
    assert_eq!(rendered[2], "__shared__ double shared_x[128];");
    assert_eq!(
        rendered[3],
        "if (tid <= (*N) - 1) { shared_y[threadIdx.x] = y[tid]; shared_x[threadIdx.x] = x[tid]; \
         shared_y[threadIdx.x] = (*a) * shared_x[threadIdx.x] + shared_y[threadIdx.x]; \
         y[tid] = shared_y[threadIdx.x]; }"
    );
}

#[test]
fn test_sum_end_to_end() {
    let out = lower(&sum(), CudaConfig::default().with_thread_count(128));
    let k = &out.kernel;

    let plan = out.analysis.reduction.as_ref().expect("sum is a reduction");
    assert_eq!(plan.variable, "s");
    assert_eq!(k.param_names().collect::<Vec<_>>(), vec!["N", "x", "block_r"]);

    let rendered: Vec<String> = k.body.iter().map(|s| s.to_string()).collect();
    assert!(rendered.contains(&format!("double {} = 0;", plan.temp)));
    assert!(rendered.contains(&"__shared__ double cache[128];".to_string()));
    assert!(rendered.contains(&"i = blockDim.x / 2;".to_string()));
    assert_eq!(calls(&k.body, "__syncthreads"), 2);

    let post = out.plan.phase(Phase::ReduceAcrossBlocks);
    assert_eq!(
        post.last().map(|s| s.to_string()),
        Some("for (i = 0; i < dimGrid.x; i++) s += block_r[i];".to_string())
    );
    // s itself never reaches the device
    assert!(!out.plan.device_vars().contains(&"dev_s".to_string()));
}

#[test]
fn test_reduction_structure() {
    for body in [
        Stmt::assign(Expr::ident("s"), Expr::ident("s").add(at("x").mul(at("y")))),
        Stmt::expr(Expr::ident("s").assign_op(AssignOp::AddAssign, at("x"))),
        Stmt::expr(Expr::ident("s").assign_op(AssignOp::SubAssign, Expr::ident("c").mul(at("x")))),
    ] {
        let out = lower(&inclusive_loop(body), CudaConfig::default());
        let k = &out.kernel.body;
        let temps = count_stmts(k, &|s| {
            matches!(s, Stmt::Decl { vars, .. }
                if vars.iter().any(|v| v.name.starts_with("orcuda_var_") && v.init == Some(Expr::int(0))))
        });
        assert_eq!(temps, 1);
        assert_eq!(count_stmts(k, &|s| matches!(s, Stmt::While { .. })), 1);

        let host = out.plan.into_stmt();
        let host_loops = count_stmts(std::slice::from_ref(&host), &|s| matches!(s, Stmt::For { .. }));
        assert_eq!(host_loops, 1);
    }
}

#[test]
fn test_array_writes_have_no_reduction() {
    for body in [
        Stmt::assign(at("y"), at("x")),
        Stmt::Compound(vec![
            Stmt::assign(Expr::ident("t"), at("x").mul(Expr::int(2))),
            Stmt::assign(at("y"), Expr::ident("t")),
        ]),
        Stmt::expr(at("h").unary(UnaryOp::PostInc)),
    ] {
        let out = lower(&inclusive_loop(body), CudaConfig::default());
        assert!(out.analysis.reduction.is_none());
        assert_eq!(count_stmts(&out.kernel.body, &|s| matches!(s, Stmt::While { .. })), 0);
        assert!(!out.kernel.param_names().any(|p| p == "block_r"));
        assert!(out.plan.phase(Phase::ReduceAcrossBlocks).is_empty());
        let host = out.plan.into_stmt();
        assert_eq!(count_stmts(std::slice::from_ref(&host), &|s| matches!(s, Stmt::For { .. })), 0);
    }
}

#[test]
fn test_classification_idempotent_under_index_substitution() {
    for stmt in [axpy(), sum()] {
        let desc = LoopDescriptor::extract(&stmt).unwrap();
        let before = Classification::of(&desc).unwrap();

        let rewritten = LoopDescriptor {
            index: "tid".to_string(),
            body: substitute_index(desc.body.clone(), &desc.index),
            ..desc.clone()
        };
        let after = Classification::of(&rewritten).unwrap();

        assert_eq!(before.array_ids, after.array_ids);
        assert_eq!(
            before.scalar_ids().collect::<Vec<_>>(),
            after.scalar_ids().collect::<Vec<_>>()
        );
        assert_eq!(before.write_ids, after.write_ids);
    }
}

/// Undo cache blocking on a kernel body: drop the shared declarations and
/// the load/store statements, then point shared slots back at the arrays.
fn strip_cache(stmts: &[Stmt]) -> Vec<Stmt> {
    let is_shared = |e: &Expr| e.array_base().is_some_and(|b| b.starts_with(SHARED_PREFIX));
    let is_staging = |s: &Stmt| match s {
        Stmt::Decl { storage: Storage::Shared, vars, .. } => {
            vars.iter().all(|v| v.name.starts_with(SHARED_PREFIX))
        }
        Stmt::Expr(Expr::Assign { op: AssignOp::Assign, target, value }) => {
            (is_shared(target) && value.array_base().is_some() && !is_shared(value))
                || (is_shared(value) && target.array_base().is_some() && !is_shared(target))
        }
        _ => false,
    };

    stmts
        .iter()
        .filter(|s| !is_staging(s))
        .map(|s| match s {
            Stmt::If { condition, then_branch, else_branch } => {
                let inner = match then_branch.as_ref() {
                    Stmt::Compound(inner) => Stmt::Compound(strip_cache(inner)),
                    other => other.clone(),
                };
                Stmt::If {
                    condition: condition.clone(),
                    then_branch: Box::new(inner),
                    else_branch: else_branch.clone(),
                }
            }
            other => other.clone(),
        })
        .map(|s| {
            s.rewrite(&mut |e| match e.array_base() {
                Some(b) if b.starts_with(SHARED_PREFIX) => {
                    Expr::ident(&b[SHARED_PREFIX.len()..]).index(Expr::ident(THREAD_ID))
                }
                _ => e,
            })
        })
        .collect()
}

#[test]
fn test_cache_blocking_is_pure_add_remove() {
    let loops = [
        axpy(),
        sum(),
        inclusive_loop(Stmt::assign(at("y"), at("x").add(at("z")))),
        inclusive_loop(Stmt::expr(at("y").assign_op(AssignOp::AddAssign, at("x")))),
    ];
    for stmt in loops {
        let plain = lower(&stmt, CudaConfig::default());
        let cached = lower(&stmt, CudaConfig::default().with_cache_blocks(true));

        assert_eq!(plain.kernel.name, cached.kernel.name);
        assert_eq!(plain.kernel.params, cached.kernel.params);
        assert_eq!(strip_cache(&cached.kernel.body), plain.kernel.body, "loop {}", stmt);
        // host side is unaffected
        assert_eq!(plain.plan, cached.plan);
    }
}

#[test]
fn test_grid_dimension_boundaries() {
    for t in [32u32, 128, 256, 1024] {
        let n = u64::from(t);
        assert_eq!(grid_dim(n, t), 1);
        assert_eq!(grid_dim(n + 1, t), 2);
        assert_eq!(grid_dim(n * 3 - 1, t), 3);
    }
}

#[test]
fn test_global_names_unique_across_calls() {
    let mut decls = Declarations::new();
    let config = CudaConfig::default();
    transform_loop(&sum(), &config, &mut decls).unwrap();
    transform_loop(&sum(), &config, &mut decls).unwrap();

    assert_eq!(decls.len(), 2);
    let names: Vec<&str> = decls.iter().map(|k| k.name.as_str()).collect();
    assert_ne!(names[0], names[1]);
    // identical loops still produce two distinct kernels
    assert_eq!(decls.iter().next().map(|k| k.body.len()), decls.last().map(|k| k.body.len()));
}

#[test]
fn test_errors_leave_loop_to_caller() {
    let mut decls = Declarations::new();
    let config = CudaConfig::default();

    let two_targets = inclusive_loop(Stmt::Compound(vec![
        Stmt::assign(Expr::ident("s"), Expr::ident("s").add(at("x"))),
        Stmt::assign(Expr::ident("t"), Expr::ident("t").add(at("y"))),
    ]));
    let err = transform_loop(&two_targets, &config, &mut decls).unwrap_err();
    assert_eq!(err.kind(), TransformErrorKind::UnsupportedPattern);
    assert_eq!(err.ident(), Some("t"));
    assert!(err.to_string().contains("s = s + x[i];"));

    let not_a_loop = Stmt::assign(Expr::ident("s"), Expr::int(0));
    let err = transform_loop(&not_a_loop, &config, &mut decls).unwrap_err();
    assert_eq!(err.kind(), TransformErrorKind::MalformedLoop);

    assert!(decls.is_empty());
}

#[test]
fn test_loop_from_json() {
    let json = serde_json::to_string(&sum()).unwrap();
    let stmt: Stmt = serde_json::from_str(&json).unwrap();
    let out = lower(&stmt, CudaConfig::default());
    assert!(out.analysis.reduction.is_some());

    let config: CudaConfig =
        serde_json::from_str(r#"{ "thread_count": 256, "cache_blocks": true }"#).unwrap();
    assert_eq!(config.thread_count, 256);
    assert!(config.timing.enabled);
}

#[test]
fn test_host_ordering() {
    let stmt = lower(&sum(), CudaConfig::default()).plan.into_stmt();
    let Stmt::Compound(stmts) = stmt else {
        panic!("host plan is not a compound statement");
    };
    let position = |pred: &dyn Fn(&Stmt) -> bool| stmts.iter().position(|s| pred(s)).unwrap();
    let is_call = |name: &'static str| {
        move |s: &Stmt| matches!(s, Stmt::Expr(Expr::Call { function, .. }) if function == name)
    };

    let launch = position(&|s| matches!(s, Stmt::Expr(Expr::Launch { .. })));
    let first_copy = position(&is_call("cudaMemcpy"));
    let last_copy = stmts.len() - 1 - stmts.iter().rev().position(|s| is_call("cudaMemcpy")(s)).unwrap();
    let first_free = position(&is_call("cudaFree"));

    assert!(first_copy < launch);
    assert!(launch < last_copy);
    assert!(last_copy < first_free);
}

#[test]
fn test_plain_product_is_not_reduced_additively() {
    // p = p * x[i] cannot be combined with the block sum tree
    let product = inclusive_loop(Stmt::assign(Expr::ident("p"), Expr::ident("p").mul(at("x"))));
    let mut decls = Declarations::new();
    let err = transform_loop(&product, &CudaConfig::default(), &mut decls).unwrap_err();
    assert_eq!(err.kind(), TransformErrorKind::UnsupportedPattern);
    assert_eq!(err.ident(), Some("p"));
    assert!(decls.is_empty());
}

#[test]
fn test_non_power_of_two_block_for_array_loop() {
    let out = lower(&axpy(), CudaConfig::new().with_thread_count(96));
    assert_eq!(
        out.plan.phase(Phase::ComputeGridDims)[0].to_string(),
        "dimGrid.x = ceil((float)N / (float)96);"
    );
    assert_eq!(out.plan.phase(Phase::ComputeGridDims)[1].to_string(), "dimBlock.x = 96;");

    let err = CudaTransform::new(CudaConfig::new().with_thread_count(96))
        .lower(&sum(), &NameGenerator::new())
        .unwrap_err();
    assert_eq!(err.kind(), TransformErrorKind::InvalidConfig);
}

#[test]
fn test_body_local_stays_in_the_kernel() {
    // { double t = x[i]; y[i] = t; }
    let body = Stmt::Compound(vec![
        Stmt::Decl {
            storage: Storage::Auto,
            ty: Type::Double,
            vars: vec![Declarator { name: "t".into(), init: Some(at("x")) }],
        },
        Stmt::assign(at("y"), Expr::ident("t")),
    ]);
    let out = lower(&inclusive_loop(body), CudaConfig::default());

    assert_eq!(out.kernel.param_names().collect::<Vec<_>>(), vec!["N", "x", "y"]);
    assert_eq!(
        out.kernel.body[1].to_string(),
        "if (tid <= (*N) - 1) { double t = x[tid]; y[tid] = t; }"
    );
    assert!(!out.plan.device_vars().contains(&format!("{}t", DEVICE_PREFIX)));
    assert!(out.analysis.reduction.is_none());
}
