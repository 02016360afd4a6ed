//! Code representation shared by the analyses and the generators.
//!
//! - `ast`: expressions, statements and function declarations
//! - `builder`: shorthand constructors
//! - `visit`: collection and rewriting traversals

pub mod ast;
pub mod builder;
pub mod visit;

pub use visit::{collect_expr, collect_stmt, AstVisitor};
