//! Structural extraction of the annotated for-loop.
//!
//! Supported shape:
//! ```text
//! for (i = 0; i <= ub; i++) body      // or i < ub, ++i, i += 1, i = i + 1
//! ```
//! Before decomposing, compound bodies holding exactly one statement are
//! collapsed so that `{ { s; } }` and `s;` are the same loop.

use crate::ir::ast::{AssignOp, BinaryOp, Expr, Stmt, UnaryOp};
use crate::ir::visit::collect_expr;
use crate::utils::errors::{TransformError, TransformResult};
use log::trace;

/// The decomposed loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDescriptor {
    /// Loop index identifier
    pub index: String,
    /// Comparator of the bound test, `Lt` or `Le`
    pub bound_op: BinaryOp,
    /// Upper bound expression, exactly as written in the test
    pub upper: Expr,
    /// Normalized loop body
    pub body: Stmt,
}

impl LoopDescriptor {
    /// Decompose `stmt` into index, bound and body.
    pub fn extract(stmt: &Stmt) -> TransformResult<Self> {
        let stmt = normalize(stmt.clone());
        let Stmt::For { init, test, step, body } = &stmt else {
            return Err(TransformError::malformed("statement is not a for-loop", &stmt));
        };

        let init = init
            .as_ref()
            .ok_or_else(|| TransformError::malformed("loop has no initialization", &stmt))?;
        let test = test
            .as_ref()
            .ok_or_else(|| TransformError::malformed("loop has no bound test", &stmt))?;
        let step = step
            .as_ref()
            .ok_or_else(|| TransformError::malformed("loop has no step", &stmt))?;

        let (index, lower) = match init {
            Expr::Assign { op: AssignOp::Assign, target, value } => match target.unparen() {
                Expr::Ident(name) => (name.clone(), value.unparen()),
                _ => {
                    return Err(TransformError::malformed(
                        "initialization must assign a plain identifier",
                        &stmt,
                    ))
                }
            },
            _ => {
                return Err(TransformError::malformed(
                    "initialization must have the form `i = lb`",
                    &stmt,
                ))
            }
        };

        let (bound_op, upper) = match test {
            Expr::Binary { op: op @ (BinaryOp::Lt | BinaryOp::Le), left, right }
                if left.unparen().is_ident(&index) =>
            {
                (*op, (**right).clone())
            }
            _ => {
                return Err(TransformError::malformed(
                    format!("bound test must have the form `{} <= ub` or `{} < ub`", index, index),
                    &stmt,
                ))
            }
        };

        if mentions(&upper, &index) {
            return Err(TransformError::malformed(
                format!("upper bound depends on the loop index `{}`", index),
                &stmt,
            ));
        }

        match step_stride(step, &index) {
            Some(1) => {}
            Some(stride) => {
                return Err(TransformError::unsupported(
                    format!("loop stride {} (only unit stride maps onto threads)", stride),
                    &stmt,
                )
                .with_ident(&index))
            }
            None => {
                return Err(TransformError::malformed(
                    format!("step must increment `{}`", index),
                    &stmt,
                ))
            }
        }

        if *lower != Expr::IntLit(0) {
            return Err(TransformError::unsupported(
                format!("lower bound `{}` (threads are numbered from 0)", lower),
                &stmt,
            )
            .with_ident(&index));
        }

        trace!("loop index `{}`, bound `{} {}`", index, bound_op, upper);

        Ok(Self {
            index,
            bound_op,
            upper,
            body: (**body).clone(),
        })
    }

    /// Number of iterations, as a host-side expression.
    ///
    /// `ub` for `<`, `ub + 1` for `<=`, with `e - 1` folded back to `e`.
    pub fn extent(&self) -> Expr {
        let upper = self.upper.unparen();
        let extent = match self.bound_op {
            BinaryOp::Le => match upper {
                Expr::Binary { op: BinaryOp::Sub, left, right } if **right == Expr::IntLit(1) => {
                    (**left).clone()
                }
                _ => upper.clone().add(Expr::int(1)),
            },
            _ => upper.clone(),
        };
        match extent {
            Expr::Ident(_) | Expr::IntLit(_) | Expr::Paren(_) => extent,
            composite => Expr::Paren(Box::new(composite)),
        }
    }
}

/// Collapse singleton compound statements around and inside the loop.
pub fn normalize(stmt: Stmt) -> Stmt {
    let stmt = unwrap_singleton(stmt);
    match stmt {
        Stmt::For { init, test, step, body } => Stmt::For {
            init,
            test,
            step,
            body: Box::new(unwrap_singleton(*body)),
        },
        other => other,
    }
}

fn unwrap_singleton(mut stmt: Stmt) -> Stmt {
    loop {
        match stmt {
            Stmt::Compound(mut stmts) if stmts.len() == 1 => {
                stmt = stmts.remove(0);
            }
            other => return other,
        }
    }
}

fn mentions(expr: &Expr, name: &str) -> bool {
    !collect_expr(expr, |e| e.is_ident(name).then_some(())).is_empty()
}

/// Stride of a step expression over `index`, if it is a constant increment.
fn step_stride(step: &Expr, index: &str) -> Option<i64> {
    match step {
        Expr::Unary { op: UnaryOp::PostInc | UnaryOp::PreInc, operand }
            if operand.unparen().is_ident(index) =>
        {
            Some(1)
        }
        Expr::Assign { op: AssignOp::AddAssign, target, value } if target.unparen().is_ident(index) => {
            match value.unparen() {
                Expr::IntLit(v) => Some(*v),
                _ => None,
            }
        }
        Expr::Assign { op: AssignOp::Assign, target, value } if target.unparen().is_ident(index) => {
            match value.unparen() {
                Expr::Binary { op: BinaryOp::Add, left, right } => {
                    match (left.unparen(), right.unparen()) {
                        (l, Expr::IntLit(v)) if l.is_ident(index) => Some(*v),
                        (Expr::IntLit(v), r) if r.is_ident(index) => Some(*v),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}
