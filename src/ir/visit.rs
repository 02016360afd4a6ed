//! Traversal utilities: read-only visiting, order-preserving collection and
//! structure-preserving rewriting.
//!
//! Collection walks nodes in pre-order (a node before its children, children
//! left to right). Rewriting is bottom-up: children are rewritten first and
//! the callback then sees the node rebuilt from its new children. The
//! callback is applied exactly once per node and never to the node it just
//! returned, so wrapping a node (e.g. `x` into `(*x)`) cannot loop.

use super::ast::*;

/// Visitor trait for traversing the AST.
pub trait AstVisitor {
    /// Visit a statement.
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    /// Visit an expression.
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

/// Visit every direct child of a statement.
pub fn walk_stmt<V: AstVisitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Expr(e) => v.visit_expr(e),
        Stmt::Decl { vars, .. } => {
            for var in vars {
                if let Some(init) = &var.init {
                    v.visit_expr(init);
                }
            }
        }
        Stmt::Compound(stmts) => {
            for s in stmts {
                v.visit_stmt(s);
            }
        }
        Stmt::If { condition, then_branch, else_branch } => {
            v.visit_expr(condition);
            v.visit_stmt(then_branch);
            if let Some(else_b) = else_branch {
                v.visit_stmt(else_b);
            }
        }
        Stmt::For { init, test, step, body } => {
            for e in [init, test, step].into_iter().flatten() {
                v.visit_expr(e);
            }
            v.visit_stmt(body);
        }
        Stmt::While { condition, body } => {
            v.visit_expr(condition);
            v.visit_stmt(body);
        }
        Stmt::Comment(_) => {}
    }
}

/// Visit every direct child of an expression.
pub fn walk_expr<V: AstVisitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Ident(_)
        | Expr::IntLit(_)
        | Expr::FloatLit(_)
        | Expr::StringLit(_)
        | Expr::SizeOf(_) => {}
        Expr::ArrayRef { array, index } => {
            v.visit_expr(array);
            v.visit_expr(index);
        }
        Expr::Field { base, .. } => v.visit_expr(base),
        Expr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Unary { operand, .. } => v.visit_expr(operand),
        Expr::Assign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::Launch { grid, block, args, .. } => {
            v.visit_expr(grid);
            v.visit_expr(block);
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::Cast { expr, .. } => v.visit_expr(expr),
        Expr::Paren(inner) => v.visit_expr(inner),
    }
}

struct Collector<F, T> {
    f: F,
    found: Vec<T>,
}

impl<F: FnMut(&Expr) -> Option<T>, T> AstVisitor for Collector<F, T> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Some(item) = (self.f)(expr) {
            self.found.push(item);
        }
        walk_expr(self, expr);
    }
}

/// Collect `f(node)` for every expression node under `expr` (inclusive)
/// for which `f` returns `Some`, in pre-order.
pub fn collect_expr<T>(expr: &Expr, f: impl FnMut(&Expr) -> Option<T>) -> Vec<T> {
    let mut c = Collector { f, found: Vec::new() };
    c.visit_expr(expr);
    c.found
}

/// Collect over every expression reachable from a statement, in pre-order.
pub fn collect_stmt<T>(stmt: &Stmt, f: impl FnMut(&Expr) -> Option<T>) -> Vec<T> {
    let mut c = Collector { f, found: Vec::new() };
    c.visit_stmt(stmt);
    c.found
}

impl Expr {
    /// Rebuild this node with `f` applied to each direct child.
    pub fn smap<F: FnMut(Expr) -> Expr>(self, f: &mut F) -> Expr {
        match self {
            Expr::Ident(_)
            | Expr::IntLit(_)
            | Expr::FloatLit(_)
            | Expr::StringLit(_)
            | Expr::SizeOf(_) => self,
            Expr::ArrayRef { array, index } => Expr::ArrayRef {
                array: Box::new(f(*array)),
                index: Box::new(f(*index)),
            },
            Expr::Field { base, field } => Expr::Field { base: Box::new(f(*base)), field },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(f(*left)),
                right: Box::new(f(*right)),
            },
            Expr::Unary { op, operand } => Expr::Unary { op, operand: Box::new(f(*operand)) },
            Expr::Assign { op, target, value } => Expr::Assign {
                op,
                target: Box::new(f(*target)),
                value: Box::new(f(*value)),
            },
            Expr::Call { function, args } => Expr::Call {
                function,
                args: args.into_iter().map(&mut *f).collect(),
            },
            Expr::Launch { kernel, grid, block, args } => Expr::Launch {
                kernel,
                grid: Box::new(f(*grid)),
                block: Box::new(f(*block)),
                args: args.into_iter().map(&mut *f).collect(),
            },
            Expr::Cast { ty, expr } => Expr::Cast { ty, expr: Box::new(f(*expr)) },
            Expr::Paren(inner) => Expr::Paren(Box::new(f(*inner))),
        }
    }

    /// Bottom-up rewrite of the whole tree.
    pub fn rewrite<F: FnMut(Expr) -> Expr>(self, f: &mut F) -> Expr {
        let rebuilt = self.smap(&mut |child: Expr| child.rewrite(&mut *f));
        f(rebuilt)
    }
}

impl Stmt {
    /// Rebuild this statement with `f` applied to every expression root it
    /// (or any nested statement) owns. `f` is not pushed into sub-expressions.
    pub fn map_exprs<F: FnMut(Expr) -> Expr>(self, f: &mut F) -> Stmt {
        match self {
            Stmt::Expr(e) => Stmt::Expr(f(e)),
            Stmt::Decl { storage, ty, vars } => {
                let mut mapped = Vec::with_capacity(vars.len());
                for var in vars {
                    let init = match var.init {
                        Some(init) => Some(f(init)),
                        None => None,
                    };
                    mapped.push(Declarator { name: var.name, init });
                }
                Stmt::Decl { storage, ty, vars: mapped }
            }
            Stmt::Compound(stmts) => {
                Stmt::Compound(stmts.into_iter().map(|s| s.map_exprs(&mut *f)).collect())
            }
            Stmt::If { condition, then_branch, else_branch } => {
                let condition = f(condition);
                let then_branch = Box::new(then_branch.map_exprs(&mut *f));
                let else_branch = match else_branch {
                    Some(else_b) => Some(Box::new(else_b.map_exprs(&mut *f))),
                    None => None,
                };
                Stmt::If { condition, then_branch, else_branch }
            }
            Stmt::For { init, test, step, body } => {
                let init = init.map(&mut *f);
                let test = test.map(&mut *f);
                let step = step.map(&mut *f);
                Stmt::For { init, test, step, body: Box::new(body.map_exprs(&mut *f)) }
            }
            Stmt::While { condition, body } => {
                let condition = f(condition);
                Stmt::While { condition, body: Box::new(body.map_exprs(&mut *f)) }
            }
            Stmt::Comment(_) => self,
        }
    }

    /// Bottom-up rewrite of every expression in the statement tree.
    pub fn rewrite<F: FnMut(Expr) -> Expr>(self, f: &mut F) -> Stmt {
        self.map_exprs(&mut |e: Expr| e.rewrite(&mut *f))
    }
}
