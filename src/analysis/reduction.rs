//! Reduction detection.
//!
//! A loop is a reduction when no assignment target in its body is an array:
//! every iteration only folds values into scalars. Each such scalar gets a
//! per-thread temporary that the kernel accumulates into and later combines
//! across the block and, on the host, across blocks.

use super::classify::{identifiers, Classification};
use crate::ir::ast::{AssignOp, BinaryOp, Expr, Stmt};
use crate::ir::visit::collect_stmt;
use crate::utils::errors::{TransformError, TransformResult};
use crate::utils::names::NameGenerator;
use log::debug;

/// Prefix of generated per-thread temporaries.
pub const TEMP_PREFIX: &str = "orcuda_var_";

/// The scalar reduced across iterations and its per-thread temporary.
///
/// Only one reduction variable is supported; [`detect`] rejects loops with
/// more, so the host-side combination loop always has a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionPlan {
    /// Host scalar the partial results are folded into
    pub variable: String,
    /// Per-thread temporary replacing it inside the kernel
    pub temp: String,
}

impl ReductionPlan {
    /// The reduction variable with its temporary.
    pub fn target(&self) -> (&str, &str) {
        (&self.variable, &self.temp)
    }

    /// Temporary standing in for `name`, if `name` is reduced.
    pub fn temp_for(&self, name: &str) -> Option<&str> {
        (self.variable == name).then_some(self.temp.as_str())
    }

    /// Check if `name` is folded into the reduction.
    pub fn is_reduced(&self, name: &str) -> bool {
        self.variable == name
    }
}

/// Decide whether the loop is a reduction and, if so, name its temporary.
///
/// Accepts additive accumulation into exactly one scalar that is not part of
/// the loop bound. Every assignment to it must have one of the forms
/// `v += e`, `v -= e`, `v = v + e`, `v = e + v` or `v = v - e`, with `e` free
/// of `v`. Increments and decrements are additive too.
pub fn detect(
    cls: &Classification,
    body: &Stmt,
    names: &NameGenerator,
) -> TransformResult<Option<ReductionPlan>> {
    if cls.array_writes().next().is_some() {
        return Ok(None);
    }

    let mut targets = cls.write_ids.iter();
    let Some(var) = targets.next() else {
        return Err(TransformError::unsupported(
            "loop body assigns nothing, so there is neither an array result nor a reduction",
            body,
        ));
    };
    if let Some(extra) = targets.next() {
        return Err(TransformError::unsupported(
            format!("more than one reduction target (`{}` and `{}`)", var, extra),
            body,
        )
        .with_ident(extra));
    }
    debug_assert!(!cls.is_array(var));

    if cls.bound_ids.contains(var) {
        return Err(TransformError::unsupported("reduction into an identifier of the loop bound", body)
            .with_ident(var));
    }

    let updates = collect_stmt(body, |e| match e {
        Expr::Assign { target, .. } if target.unparen().is_ident(var) => Some(e.clone()),
        _ => None,
    });
    if let Some(update) = updates.iter().find(|u| !is_additive_update(u, var)) {
        return Err(TransformError::unsupported(
            format!("non-additive reduction `{}`", update),
            body,
        )
        .with_ident(var));
    }

    let temp = names.fresh(TEMP_PREFIX);
    debug!("reduction over `{}` using per-thread temporary `{}`", var, temp);

    Ok(Some(ReductionPlan { variable: var.clone(), temp }))
}

/// Check that `update` folds a `var`-free term into `var` by addition.
fn is_additive_update(update: &Expr, var: &str) -> bool {
    let free = |e: &Expr| !identifiers(e).contains(var);
    match update {
        Expr::Assign { op: AssignOp::AddAssign | AssignOp::SubAssign, value, .. } => free(value),
        Expr::Assign { op: AssignOp::Assign, value, .. } => match value.unparen() {
            Expr::Binary { op: BinaryOp::Add, left, right } => {
                (left.unparen().is_ident(var) && free(right))
                    || (right.unparen().is_ident(var) && free(left))
            }
            Expr::Binary { op: BinaryOp::Sub, left, right } => {
                left.unparen().is_ident(var) && free(right)
            }
            _ => false,
        },
        _ => false,
    }
}
