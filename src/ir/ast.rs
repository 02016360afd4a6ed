//! Abstract syntax tree shared by the loop transformer.
//!
//! The tree models the C-like subset that annotated loops are written in
//! plus the handful of CUDA constructs the transformer emits (kernel
//! launches, `__shared__` declarations, `__global__` functions). Parsing
//! source text into this tree and rendering it back to text both happen
//! outside this crate; the `Display` impls here exist for diagnostics only.
//!
//! Nodes are plain values. Every rewrite in the crate consumes or clones a
//! tree and builds a new one, so a sub-expression copied into both the
//! kernel and the host code can never be changed through the other copy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A type as it appears in declarations and casts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// `int`
    Int,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `void`
    Void,
    /// Pointer to another type: `T*`
    Pointer(Box<Type>),
    /// Fixed-size array: `T name[len]`
    Array {
        /// Element type
        element: Box<Type>,
        /// Number of elements
        len: u64,
    },
    /// Opaque library type such as `dim3`, `cudaEvent_t` or `FILE`
    Named(String),
}

impl Type {
    /// Wrap this type in a pointer.
    pub fn ptr(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    /// Fixed-size array of this type.
    pub fn array(self, len: u64) -> Type {
        Type::Array {
            element: Box::new(self),
            len,
        }
    }

    /// Opaque named type.
    pub fn named(name: &str) -> Type {
        Type::Named(name.to_string())
    }

    /// Check if this is a pointer type.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Size in bytes of a value of this type on the device, when known.
    pub fn size_in_bytes(&self) -> Option<u64> {
        match self {
            Type::Int | Type::Float => Some(4),
            Type::Double | Type::Pointer(_) => Some(8),
            Type::Array { element, len } => element.size_in_bytes().map(|s| s * len),
            Type::Void | Type::Named(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Void => write!(f, "void"),
            Type::Pointer(inner) => write!(f, "{}*", inner),
            Type::Array { element, len } => write!(f, "{}[{}]", element, len),
            Type::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,

    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,

    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Check if this is a comparison operator.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `*x`
    Deref,
    /// `&x`
    AddressOf,
    /// `++x`
    PreInc,
    /// `--x`
    PreDec,
    /// `x++`
    PostInc,
    /// `x--`
    PostDec,
}

impl UnaryOp {
    /// Whether the operator is written after its operand.
    pub fn is_postfix(&self) -> bool {
        matches!(self, UnaryOp::PostInc | UnaryOp::PostDec)
    }

    fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Deref => "*",
            UnaryOp::AddressOf => "&",
            UnaryOp::PreInc | UnaryOp::PostInc => "++",
            UnaryOp::PreDec | UnaryOp::PostDec => "--",
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
}

impl AssignOp {
    /// Compound assignments read their target before writing it.
    pub fn reads_target(&self) -> bool {
        !matches!(self, AssignOp::Assign)
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Assign => write!(f, "="),
            AssignOp::AddAssign => write!(f, "+="),
            AssignOp::SubAssign => write!(f, "-="),
            AssignOp::MulAssign => write!(f, "*="),
            AssignOp::DivAssign => write!(f, "/="),
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Identifier reference
    Ident(String),
    /// Integer literal
    IntLit(i64),
    /// Floating-point literal
    FloatLit(f64),
    /// String literal (unescaped contents)
    StringLit(String),

    /// Single subscript: `array[index]`
    ArrayRef {
        /// Subscripted expression
        array: Box<Expr>,
        /// Subscript
        index: Box<Expr>,
    },

    /// Member access: `base.field`
    Field {
        /// Structure expression
        base: Box<Expr>,
        /// Member name
        field: String,
    },

    /// Binary operation: `left op right`
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },

    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },

    /// Assignment expression: `target op value`
    Assign {
        /// Plain or compound assignment
        op: AssignOp,
        /// Assigned location
        target: Box<Expr>,
        /// Assigned value
        value: Box<Expr>,
    },

    /// Function call: `function(args)`
    Call {
        /// Callee name
        function: String,
        /// Arguments in order
        args: Vec<Expr>,
    },

    /// Kernel launch: `kernel<<<grid, block>>>(args)`
    Launch {
        /// Kernel name
        kernel: String,
        /// Grid dimensions
        grid: Box<Expr>,
        /// Block dimensions
        block: Box<Expr>,
        /// Kernel arguments in order
        args: Vec<Expr>,
    },

    /// Cast: `(type) expr`
    Cast {
        /// Target type
        ty: Type,
        /// Converted expression
        expr: Box<Expr>,
    },

    /// `sizeof(type)`
    SizeOf(Type),

    /// Parenthesized expression
    Paren(Box<Expr>),
}

impl Expr {
    /// Name of the identifier if this is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Name of the subscripted identifier if this is `name[..]`.
    pub fn array_base(&self) -> Option<&str> {
        match self {
            Expr::ArrayRef { array, .. } => array.as_ident(),
            _ => None,
        }
    }

    /// Strip any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        match self {
            Expr::Paren(inner) => inner.unparen(),
            other => other,
        }
    }

    /// Check if this is the identifier `name`.
    pub fn is_ident(&self, name: &str) -> bool {
        self.as_ident() == Some(name)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::IntLit(v) => write!(f, "{}", v),
            Expr::FloatLit(v) => write!(f, "{:?}", v),
            Expr::StringLit(s) => write!(f, "{:?}", s),
            Expr::ArrayRef { array, index } => write!(f, "{}[{}]", array, index),
            Expr::Field { base, field } => write!(f, "{}.{}", base, field),
            Expr::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Unary { op, operand } if op.is_postfix() => write!(f, "{}{}", operand, op.symbol()),
            Expr::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            Expr::Assign { op, target, value } => write!(f, "{} {} {}", target, op, value),
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Launch { kernel, grid, block, args } => {
                write!(f, "{}<<<{},{}>>>(", kernel, grid, block)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Cast { ty, expr } => write!(f, "({}){}", ty, expr),
            Expr::SizeOf(ty) => write!(f, "sizeof({})", ty),
            Expr::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

/// Storage qualifier on a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// Ordinary automatic storage
    Auto,
    /// Block-local `__shared__` memory
    Shared,
}

/// One declared name, with an optional initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    /// Declared name
    pub name: String,
    /// Initializer, if any
    pub init: Option<Expr>,
}

impl fmt::Display for Declarator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.init {
            Some(init) => write!(f, "{} = {}", self.name, init),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Expression statement: `expr;`
    Expr(Expr),

    /// Variable declaration: `storage ty a, b = init;`
    Decl {
        /// Storage qualifier
        storage: Storage,
        /// Declared type
        ty: Type,
        /// Declared names
        vars: Vec<Declarator>,
    },

    /// Compound statement: `{ stmts }`
    Compound(Vec<Stmt>),

    /// If statement
    If {
        /// Condition
        condition: Expr,
        /// Taken when the condition holds
        then_branch: Box<Stmt>,
        /// Taken otherwise
        else_branch: Option<Box<Stmt>>,
    },

    /// C-style for loop: `for (init; test; step) body`
    For {
        /// Initialization clause
        init: Option<Expr>,
        /// Loop test
        test: Option<Expr>,
        /// Step clause
        step: Option<Expr>,
        /// Loop body
        body: Box<Stmt>,
    },

    /// While loop
    While {
        /// Loop condition
        condition: Expr,
        /// Loop body
        body: Box<Stmt>,
    },

    /// Line comment carried through to the output
    Comment(String),
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr(e) => write!(f, "{};", e),
            Stmt::Decl { storage, ty, vars } => {
                if *storage == Storage::Shared {
                    write!(f, "__shared__ ")?;
                }
                match ty {
                    // C puts the array extent after the declarator
                    Type::Array { element, len } => {
                        write!(f, "{} ", element)?;
                        for (i, var) in vars.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}[{}]", var.name, len)?;
                        }
                    }
                    // Each declarator carries its own `*`
                    Type::Pointer(_) => {
                        let mut base = ty;
                        let mut stars = String::new();
                        while let Type::Pointer(inner) = base {
                            stars.push('*');
                            base = inner;
                        }
                        write!(f, "{} ", base)?;
                        for (i, var) in vars.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}{}", stars, var)?;
                        }
                    }
                    _ => {
                        write!(f, "{} ", ty)?;
                        write_list(f, vars)?;
                    }
                }
                write!(f, ";")
            }
            Stmt::Compound(stmts) => {
                write!(f, "{{ ")?;
                for stmt in stmts {
                    write!(f, "{} ", stmt)?;
                }
                write!(f, "}}")
            }
            Stmt::If { condition, then_branch, else_branch } => {
                write!(f, "if ({}) {}", condition, then_branch)?;
                if let Some(else_b) = else_branch {
                    write!(f, " else {}", else_b)?;
                }
                Ok(())
            }
            Stmt::For { init, test, step, body } => {
                let opt = |e: &Option<Expr>| e.as_ref().map(|e| e.to_string()).unwrap_or_default();
                write!(f, "for ({}; {}; {}) {}", opt(init), opt(test), opt(step), body)
            }
            Stmt::While { condition, body } => write!(f, "while ({}) {}", condition, body),
            Stmt::Comment(text) => write!(f, "/* {} */", text),
        }
    }
}

/// Function-level qualifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunQualifier {
    /// `__global__`: a kernel entry point callable from the host
    Global,
    /// `__device__`
    Device,
}

impl fmt::Display for FunQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunQualifier::Global => write!(f, "__global__"),
            FunQualifier::Device => write!(f, "__device__"),
        }
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter type
    pub ty: Type,
    /// Parameter name
    pub name: String,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.name)
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunDecl {
    /// Function name
    pub name: String,
    /// Return type
    pub return_type: Type,
    /// Qualifiers written before the return type
    pub qualifiers: Vec<FunQualifier>,
    /// Parameters in order
    pub params: Vec<Param>,
    /// Statements of the body
    pub body: Vec<Stmt>,
}

impl fmt::Display for FunDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for q in &self.qualifiers {
            write!(f, "{} ", q)?;
        }
        write!(f, "{} {}(", self.return_type, self.name)?;
        write_list(f, &self.params)?;
        write!(f, ") {}", Stmt::Compound(self.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Int.to_string(), "int");
        assert_eq!(Type::Double.ptr().to_string(), "double*");
        assert_eq!(Type::Double.ptr().ptr().to_string(), "double**");
        assert_eq!(Type::named("dim3").to_string(), "dim3");
    }

    #[test]
    fn test_type_sizes() {
        assert_eq!(Type::Double.size_in_bytes(), Some(8));
        assert_eq!(Type::Int.array(16).size_in_bytes(), Some(64));
        assert_eq!(Type::named("FILE").size_in_bytes(), None);
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::Assign {
            op: AssignOp::AddAssign,
            target: Box::new(Expr::Ident("s".into())),
            value: Box::new(Expr::ArrayRef {
                array: Box::new(Expr::Ident("x".into())),
                index: Box::new(Expr::Ident("i".into())),
            }),
        };
        assert_eq!(e.to_string(), "s += x[i]");

        let post = Expr::Unary { op: UnaryOp::PostInc, operand: Box::new(Expr::Ident("i".into())) };
        assert_eq!(post.to_string(), "i++");
    }

    #[test]
    fn test_shared_decl_display() {
        let decl = Stmt::Decl {
            storage: Storage::Shared,
            ty: Type::Double.array(128),
            vars: vec![Declarator { name: "cache".into(), init: None }],
        };
        assert_eq!(decl.to_string(), "__shared__ double cache[128];");
    }

    #[test]
    fn test_pointer_decl_stars_every_name() {
        let decl = Stmt::Decl {
            storage: Storage::Auto,
            ty: Type::Double.ptr(),
            vars: vec![
                Declarator { name: "dev_y".into(), init: None },
                Declarator { name: "dev_x".into(), init: None },
            ],
        };
        assert_eq!(decl.to_string(), "double *dev_y, *dev_x;");

        let decl = Stmt::Decl {
            storage: Storage::Auto,
            ty: Type::Int.ptr().ptr(),
            vars: vec![Declarator { name: "pp".into(), init: None }],
        };
        assert_eq!(decl.to_string(), "int **pp;");
    }

    #[test]
    fn test_unparen() {
        let e = Expr::Paren(Box::new(Expr::Paren(Box::new(Expr::Ident("n".into())))));
        assert!(e.unparen().is_ident("n"));
        assert!(!e.is_ident("n"));
    }
}
