//! Identifier classification for a loop body.
//!
//! Partitions every identifier the loop mentions into the bound set, the
//! array/scalar split, the write set (base identifiers of assignment
//! targets) and the read set. All sets keep first-appearance order so the
//! kernel signature and device variable names come out deterministically.

use super::loop_info::LoopDescriptor;
use crate::ir::ast::{Expr, Stmt, UnaryOp};
use crate::ir::visit::{collect_expr, collect_stmt, walk_expr, walk_stmt, AstVisitor};
use crate::utils::errors::{TransformError, TransformResult};
use indexmap::{IndexMap, IndexSet};
use log::trace;

/// Role of one identifier in the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableRole {
    /// Ever the subject of a subscript
    pub is_array: bool,
    /// Ever the base of an assignment target
    pub is_written: bool,
    /// Ever read in the body
    pub is_read: bool,
    /// Appears in the upper bound
    pub in_bound: bool,
}

/// Classification of all identifiers of a loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Loop index (excluded from every body set)
    pub index: String,
    /// Names declared inside the body; per-thread in the kernel, so they are
    /// excluded from every body set as well
    pub locals: IndexSet<String>,
    /// Identifiers of the upper bound
    pub bound_ids: IndexSet<String>,
    /// Identifiers referenced in the body
    pub body_ids: IndexSet<String>,
    /// Body identifiers that are subscripted somewhere
    pub array_ids: IndexSet<String>,
    /// Base identifiers of assignment targets
    pub write_ids: IndexSet<String>,
    /// Identifiers whose value the body reads
    pub read_ids: IndexSet<String>,
    /// Per-identifier roles, bound identifiers first
    pub roles: IndexMap<String, VariableRole>,
}

impl Classification {
    /// Classify the identifiers of a decomposed loop.
    pub fn of(desc: &LoopDescriptor) -> TransformResult<Self> {
        let index = desc.index.clone();
        let locals = local_declarations(&desc.body);
        let outer = |name: &String| *name != index && !locals.contains(name);

        let bound_ids = identifiers(&desc.upper);
        let body_ids: IndexSet<String> =
            body_identifiers(&desc.body).into_iter().filter(outer).collect();

        reject_nested_subscripts(&desc.body)?;
        let array_ids: IndexSet<String> =
            collect_stmt(&desc.body, |e| e.array_base().map(str::to_string))
                .into_iter()
                .filter(outer)
                .collect();
        let write_ids: IndexSet<String> =
            write_set(&desc.body, &index)?.into_iter().filter(outer).collect();
        let read_ids: IndexSet<String> =
            read_set(&desc.body, &index).into_iter().filter(outer).collect();
        if !locals.is_empty() {
            trace!("body-local declarations: {:?}", locals);
        }

        if let Some(name) = array_ids.iter().find(|a| bound_ids.contains(*a)) {
            return Err(TransformError::unsupported(
                "identifier is both a loop bound and a subscripted array",
                &desc.body,
            )
            .with_ident(name));
        }

        let mut roles = IndexMap::new();
        for name in bound_ids.iter().chain(body_ids.iter()) {
            roles.entry(name.clone()).or_insert_with(|| VariableRole {
                is_array: array_ids.contains(name),
                is_written: write_ids.contains(name),
                is_read: read_ids.contains(name),
                in_bound: bound_ids.contains(name),
            });
        }

        for (name, role) in &roles {
            trace!("`{}`: {:?}", name, role);
        }
        debug_assert!(array_ids.iter().all(|a| body_ids.contains(a)));
        debug_assert!(write_ids.iter().all(|w| body_ids.contains(w)));

        Ok(Self {
            index,
            locals,
            bound_ids,
            body_ids,
            array_ids,
            write_ids,
            read_ids,
            roles,
        })
    }

    /// Check if `name` is subscripted anywhere in the body.
    pub fn is_array(&self, name: &str) -> bool {
        self.array_ids.contains(name)
    }

    /// Write-set members that are arrays.
    pub fn array_writes(&self) -> impl Iterator<Item = &String> {
        self.write_ids.iter().filter(|w| self.array_ids.contains(*w))
    }

    /// Body identifiers that are scalars (never subscripted).
    pub fn scalar_ids(&self) -> impl Iterator<Item = &String> {
        self.body_ids.iter().filter(|n| !self.array_ids.contains(*n))
    }

    /// Arrays the body reads.
    pub fn read_arrays(&self) -> impl Iterator<Item = &String> {
        self.array_ids.iter().filter(|a| self.read_ids.contains(*a))
    }
}

/// Every identifier of an expression, in first-appearance order.
pub fn identifiers(expr: &Expr) -> IndexSet<String> {
    collect_expr(expr, |e| e.as_ident().map(str::to_string))
        .into_iter()
        .collect()
}

/// Every identifier of a statement, in first-appearance order.
pub fn body_identifiers(stmt: &Stmt) -> IndexSet<String> {
    collect_stmt(stmt, |e| e.as_ident().map(str::to_string))
        .into_iter()
        .collect()
}

/// Names declared by `Decl` statements anywhere in `body`.
fn local_declarations(body: &Stmt) -> IndexSet<String> {
    struct Locals(IndexSet<String>);

    impl AstVisitor for Locals {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if let Stmt::Decl { vars, .. } = stmt {
                self.0.extend(vars.iter().map(|v| v.name.clone()));
            }
            walk_stmt(self, stmt);
        }
    }

    let mut locals = Locals(IndexSet::new());
    locals.visit_stmt(body);
    locals.0
}

fn reject_nested_subscripts(body: &Stmt) -> TransformResult<()> {
    let nested = collect_stmt(body, |e| match e {
        Expr::ArrayRef { array, .. } if array.as_ident().is_none() => Some(e.clone()),
        _ => None,
    });
    match nested.first() {
        Some(e) => Err(TransformError::unsupported(
            format!("subscript `{}` is not a single subscript of an identifier", e),
            body,
        )),
        None => Ok(()),
    }
}

/// Base identifier written by an assignment or increment target.
fn target_base(target: &Expr) -> Option<&str> {
    match target.unparen() {
        Expr::Ident(name) => Some(name.as_str()),
        other => other.array_base(),
    }
}

fn write_set(body: &Stmt, index: &str) -> TransformResult<IndexSet<String>> {
    let targets = collect_stmt(body, |e| match e {
        Expr::Assign { target, .. } => Some((**target).clone()),
        Expr::Unary {
            op: UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec,
            operand,
        } => Some((**operand).clone()),
        _ => None,
    });

    let mut writes = IndexSet::new();
    for target in &targets {
        let base = target_base(target).ok_or_else(|| {
            TransformError::unsupported(
                format!("assignment target `{}` is neither an identifier nor a subscripted identifier", target),
                body,
            )
        })?;
        if base == index {
            return Err(TransformError::unsupported("loop body modifies the loop index", body)
                .with_ident(index));
        }
        writes.insert(base.to_string());
    }
    Ok(writes)
}

/// Collects identifiers in read positions: everything except the bare
/// target of a plain `=` (and the array identifier of `a[..] = ..`).
struct ReadCollector<'a> {
    index: &'a str,
    reads: IndexSet<String>,
}

impl AstVisitor for ReadCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Assign { op, target, value } => {
                match target.unparen() {
                    Expr::Ident(name) => {
                        if op.reads_target() {
                            self.note(name);
                        }
                    }
                    Expr::ArrayRef { array, index } => {
                        if op.reads_target() {
                            self.visit_expr(array);
                        }
                        self.visit_expr(index);
                    }
                    other => self.visit_expr(other),
                }
                self.visit_expr(value);
            }
            Expr::Ident(name) => self.note(name),
            _ => walk_expr(self, expr),
        }
    }
}

impl ReadCollector<'_> {
    fn note(&mut self, name: &str) {
        if name != self.index {
            self.reads.insert(name.to_string());
        }
    }
}

fn read_set(body: &Stmt, index: &str) -> IndexSet<String> {
    let mut c = ReadCollector { index, reads: IndexSet::new() };
    c.visit_stmt(body);
    c.reads
}
