//! Binding expression parser and AST types for the velm framework.
//!
//! The AST is a tagged-variant tree; transformation passes downstream
//! (binding, folding, translation) are explicit recursive functions over it.

pub mod ast;
pub use ast::{BinaryOperator, Expr, ExprKind, Literal, Span, UnaryOperator};

pub mod parser;
pub use parser::{ParseError, parse_expression};
