//! Expression binding against typed data contexts.
//!
//! This crate turns a parsed binding expression into a typed expression tree
//! resolved against a `DataContextStack`:
//! - `DataContextStack` / `ExtensionParameter` - the hierarchical context
//! - `Binder` - identifier/member resolution producing `TypedExpr`
//! - expected-type conversions (magic lambda, implicit numeric, `ToString`)
//! - constant folding and lambda substitution over the typed tree
//! - a server-side evaluator for resource bindings and tests

pub mod context;
pub use context::{DataContextStack, ExtensionParameter, NamespaceImport};

pub mod typed;
pub use typed::{ConversionKind, TypedExpr};

pub mod bind;
pub use bind::{Binder, BindingError, BindingParserOptions};

pub mod convert;
pub use convert::{ensure_implicit_conversion, magic_lambda_conversion};

pub mod ops;

pub mod fold;
pub use fold::fold_constants;

pub mod eval;
pub use eval::{EvalContext, EvalError, Evaluator};

pub mod testing;
pub use testing::BindingTestHelper;
