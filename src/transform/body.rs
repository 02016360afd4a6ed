//! Rewriting of the loop body into its per-thread form.
//!
//! Steps run in a fixed order, each on the output of the previous one:
//!
//! 1. every occurrence of the loop index becomes the thread id, including
//!    occurrences nested inside subscripts;
//! 2. the reduction variable, if any, becomes its per-thread temporary;
//! 3. scalar identifiers, which the kernel receives by address, are
//!    dereferenced;
//! 4. with cache blocking, `a[tid]` is redirected to `shared_a[threadIdx.x]`,
//!    separately for the target and the value of each assignment.

use crate::analysis::cache::CacheDecision;
use crate::analysis::classify::Classification;
use crate::analysis::reduction::ReductionPlan;
use crate::ir::ast::{Expr, Stmt};
use indexmap::IndexSet;
use log::trace;

/// Identifier holding the global thread index inside the kernel.
pub const THREAD_ID: &str = "tid";

/// `threadIdx.x`, the position of a thread within its block.
pub fn thread_in_block() -> Expr {
    Expr::ident("threadIdx").field("x")
}

/// Which side of an assignment an access sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Read,
    Write,
}

/// Rewrites a loop body for one kernel.
#[derive(Debug)]
pub struct BodyRewriter<'a> {
    cls: &'a Classification,
    reduction: Option<&'a ReductionPlan>,
    cache: &'a [CacheDecision],
}

impl<'a> BodyRewriter<'a> {
    /// Rewriter for one analyzed loop.
    pub fn new(
        cls: &'a Classification,
        reduction: Option<&'a ReductionPlan>,
        cache: &'a [CacheDecision],
    ) -> Self {
        Self { cls, reduction, cache }
    }

    /// Scalars passed to the kernel by address: every non-array body
    /// identifier, bound identifiers included, except the reduction variable.
    pub fn pointer_scalars(&self) -> IndexSet<String> {
        self.cls
            .scalar_ids()
            .filter(|name| !self.reduction.is_some_and(|r| r.is_reduced(name)))
            .cloned()
            .collect()
    }

    /// Run all rewrite steps on a copy of `body`.
    pub fn rewrite(&self, body: &Stmt) -> Stmt {
        let body = substitute_index(body.clone(), &self.cls.index);
        let body = match self.reduction {
            Some(plan) => rename(body, &plan.variable, &plan.temp),
            None => body,
        };
        let body = dereference(body, &self.pointer_scalars());
        if self.cache.is_empty() {
            body
        } else {
            self.redirect_to_shared(body)
        }
    }

    fn redirect_to_shared(&self, body: Stmt) -> Stmt {
        body.map_exprs(&mut |e| self.cache_expr(e, Side::Read))
    }

    /// Top-down so that the side of an access is known when it is reached.
    fn cache_expr(&self, expr: Expr, side: Side) -> Expr {
        match expr {
            Expr::Assign { op, target, value } => Expr::Assign {
                op,
                target: Box::new(self.cache_expr(*target, Side::Write)),
                value: Box::new(self.cache_expr(*value, Side::Read)),
            },
            Expr::ArrayRef { array, index } => {
                let hit = array.as_ident().and_then(|name| {
                    self.cache.iter().find(|d| {
                        d.array == name
                            && index.unparen().is_ident(THREAD_ID)
                            && match side {
                                Side::Read => d.read_cached,
                                Side::Write => d.write_cached,
                            }
                    })
                });
                match hit {
                    Some(d) => {
                        trace!("{:?} access to `{}` goes through `{}`", side, d.array, d.shared);
                        Expr::ident(&d.shared).index(thread_in_block())
                    }
                    None => Expr::ArrayRef {
                        array,
                        index: Box::new(self.cache_expr(*index, Side::Read)),
                    },
                }
            }
            other => other.smap(&mut |child| self.cache_expr(child, side)),
        }
    }
}

/// Replace every occurrence of `index` with the thread id.
pub fn substitute_index(body: Stmt, index: &str) -> Stmt {
    rename(body, index, THREAD_ID)
}

/// Replace every identifier `from` with `to`.
pub fn rename(body: Stmt, from: &str, to: &str) -> Stmt {
    body.rewrite(&mut |e| match e {
        Expr::Ident(ref name) if name == from => Expr::ident(to),
        other => other,
    })
}

/// Wrap every identifier in `names` as `(*name)`.
pub fn dereference(body: Stmt, names: &IndexSet<String>) -> Stmt {
    body.rewrite(&mut |e| deref_ident(e, names))
}

/// Dereference the identifiers of the loop bound for use inside the kernel.
pub fn dereference_bound(upper: &Expr, bound_ids: &IndexSet<String>) -> Expr {
    upper.clone().rewrite(&mut |e| deref_ident(e, bound_ids))
}

fn deref_ident(e: Expr, names: &IndexSet<String>) -> Expr {
    match e {
        Expr::Ident(ref name) if names.contains(name) => e.deref(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cache;
    use crate::analysis::loop_info::LoopDescriptor;
    use crate::analysis::reduction;
    use crate::ir::ast::{AssignOp, BinaryOp};
    use crate::utils::names::NameGenerator;

    fn at(a: &str) -> Expr {
        Expr::ident(a).index(Expr::ident("i"))
    }

    fn classify(body: &Stmt) -> Classification {
        Classification::of(&LoopDescriptor {
            index: "i".into(),
            bound_op: BinaryOp::Lt,
            upper: Expr::ident("N"),
            body: body.clone(),
        })
        .unwrap()
    }

    fn axpy() -> Stmt {
        Stmt::assign(at("y"), Expr::ident("a").mul(at("x")).add(at("y")))
    }

    #[test]
    fn test_axpy_uncached() {
        let body = axpy();
        let cls = classify(&body);
        let out = BodyRewriter::new(&cls, None, &[]).rewrite(&body);
        assert_eq!(out.to_string(), "y[tid] = (*a) * x[tid] + y[tid];");
    }

    #[test]
    fn test_axpy_cached() {
        let body = axpy();
        let cls = classify(&body);
        let decisions = cache::decide(&cls, &body, true);
        let out = BodyRewriter::new(&cls, None, &decisions).rewrite(&body);
        assert_eq!(
            out.to_string(),
            "shared_y[threadIdx.x] = (*a) * shared_x[threadIdx.x] + shared_y[threadIdx.x];"
        );
    }

    #[test]
    fn test_sum_renamed_to_temp() {
        let body = Stmt::assign(Expr::ident("s"), Expr::ident("s").add(at("x")));
        let cls = classify(&body);
        let plan = reduction::detect(&cls, &body, &NameGenerator::new()).unwrap();
        let rw = BodyRewriter::new(&cls, plan.as_ref(), &[]);
        assert!(rw.pointer_scalars().is_empty());
        assert_eq!(rw.rewrite(&body).to_string(), "orcuda_var_0 = orcuda_var_0 + x[tid];");
    }

    #[test]
    fn test_nested_index_substitution() {
        // y[i] = x[i + 1] * i
        let body = Stmt::assign(
            at("y"),
            Expr::ident("x")
                .index(Expr::ident("i").add(Expr::int(1)))
                .mul(Expr::ident("i")),
        );
        let cls = classify(&body);
        let out = BodyRewriter::new(&cls, None, &[]).rewrite(&body);
        assert_eq!(out.to_string(), "y[tid] = x[tid + 1] * tid;");
    }

    #[test]
    fn test_bound_identifier_dereferenced_in_body() {
        let body = Stmt::assign(at("y"), at("x").div(Expr::ident("N")));
        let cls = classify(&body);
        let out = BodyRewriter::new(&cls, None, &[]).rewrite(&body);
        assert_eq!(out.to_string(), "y[tid] = x[tid] / (*N);");
    }

    #[test]
    fn test_cache_sides_decided_separately() {
        // y[i] = x[i]; only x is read, only y is written
        let body = Stmt::assign(at("y"), at("x"));
        let cls = classify(&body);
        let decisions = cache::decide(&cls, &body, true);
        let out = BodyRewriter::new(&cls, None, &decisions).rewrite(&body);
        assert_eq!(out.to_string(), "shared_y[threadIdx.x] = shared_x[threadIdx.x];");
    }

    #[test]
    fn test_compound_assignment_cached() {
        let body = Stmt::expr(at("y").assign_op(AssignOp::AddAssign, at("x")));
        let cls = classify(&body);
        let decisions = cache::decide(&cls, &body, true);
        let out = BodyRewriter::new(&cls, None, &decisions).rewrite(&body);
        assert_eq!(out.to_string(), "shared_y[threadIdx.x] += shared_x[threadIdx.x];");
    }

    #[test]
    fn test_dereference_bound() {
        let bound = Expr::ident("N").sub(Expr::ident("M"));
        let ids = classify(&axpy()).bound_ids;
        assert_eq!(dereference_bound(&bound, &ids).to_string(), "(*N) - M");
        // the input is left alone
        assert_eq!(bound.to_string(), "N - M");
    }
}
