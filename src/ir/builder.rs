//! Shorthand constructors for building generated code.
//!
//! The kernel assembler and host planner emit dozens of nodes each; these
//! helpers keep that code readable.

use super::ast::*;

impl Expr {
    /// Identifier reference
    pub fn ident(name: &str) -> Self {
        Expr::Ident(name.to_string())
    }

    /// Integer literal
    pub fn int(v: i64) -> Self {
        Expr::IntLit(v)
    }

    /// String literal
    pub fn string(s: &str) -> Self {
        Expr::StringLit(s.to_string())
    }

    /// `base.field`
    pub fn field(self, field: &str) -> Self {
        Expr::Field { base: Box::new(self), field: field.to_string() }
    }

    /// `self[index]`
    pub fn index(self, index: Expr) -> Self {
        Expr::ArrayRef { array: Box::new(self), index: Box::new(index) }
    }

    /// `self op other`
    pub fn binary(self, op: BinaryOp, other: Self) -> Self {
        Expr::Binary { op, left: Box::new(self), right: Box::new(other) }
    }

    /// `self + other`
    pub fn add(self, other: Self) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    /// `self - other`
    pub fn sub(self, other: Self) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    /// `self * other`
    pub fn mul(self, other: Self) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    /// `self / other`
    pub fn div(self, other: Self) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    /// Apply a unary operator
    pub fn unary(self, op: UnaryOp) -> Self {
        Expr::Unary { op, operand: Box::new(self) }
    }

    /// `&self`
    pub fn address_of(self) -> Self {
        self.unary(UnaryOp::AddressOf)
    }

    /// `(*self)`
    pub fn deref(self) -> Self {
        Expr::Paren(Box::new(self.unary(UnaryOp::Deref)))
    }

    /// `(ty) self`
    pub fn cast(self, ty: Type) -> Self {
        Expr::Cast { ty, expr: Box::new(self) }
    }

    /// `self op value` as an expression.
    pub fn assign_op(self, op: AssignOp, value: Expr) -> Self {
        Expr::Assign { op, target: Box::new(self), value: Box::new(value) }
    }

    /// `self = value` as an expression.
    pub fn assign(self, value: Expr) -> Self {
        self.assign_op(AssignOp::Assign, value)
    }

    /// `function(args)`
    pub fn call(function: &str, args: Vec<Expr>) -> Self {
        Expr::Call { function: function.to_string(), args }
    }
}

impl Stmt {
    /// `e;`
    pub fn expr(e: Expr) -> Self {
        Stmt::Expr(e)
    }

    /// `function(args);`
    pub fn call(function: &str, args: Vec<Expr>) -> Self {
        Stmt::Expr(Expr::call(function, args))
    }

    /// `target = value;`
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Expr(target.assign(value))
    }

    /// `ty a, b, c;`
    pub fn decl(ty: Type, names: &[&str]) -> Self {
        Stmt::Decl {
            storage: Storage::Auto,
            ty,
            vars: names
                .iter()
                .map(|n| Declarator { name: n.to_string(), init: None })
                .collect(),
        }
    }

    /// `ty name = init;`
    pub fn decl_init(ty: Type, name: &str, init: Expr) -> Self {
        Stmt::Decl {
            storage: Storage::Auto,
            ty,
            vars: vec![Declarator { name: name.to_string(), init: Some(init) }],
        }
    }

    /// `__shared__ element name[len];`
    pub fn shared_array(element: Type, name: &str, len: u64) -> Self {
        Stmt::Decl {
            storage: Storage::Shared,
            ty: element.array(len),
            vars: vec![Declarator { name: name.to_string(), init: None }],
        }
    }

    /// Comment carried into the output
    pub fn comment(text: &str) -> Self {
        Stmt::Comment(text.to_string())
    }

    /// `if (condition) then_branch`
    pub fn if_then(condition: Expr, then_branch: Stmt) -> Self {
        Stmt::If { condition, then_branch: Box::new(then_branch), else_branch: None }
    }
}
