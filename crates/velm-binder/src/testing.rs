//! Helper for creating and exercising bindings in tests.
//!
//! Mirrors the shape of the framework's binding test helper: build a data
//! context stack from a list of context types (first element is `_root`,
//! last is `_this`), parse and bind expressions with the expected-type
//! conversion applied, and evaluate them against concrete view models.

use thiserror::Error;

use velm_common::types::{TypeId, TypeRegistry};
use velm_common::value::Value;
use velm_parser::parse_expression;

use crate::bind::{Binder, BindingError, BindingParserOptions};
use crate::context::{DataContextStack, ExtensionParameter, NamespaceImport};
use crate::eval::{EvalContext, EvalError, Evaluator};
use crate::fold::fold_constants;
use crate::typed::TypedExpr;

#[derive(Debug, Error)]
pub enum TestBindingError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub struct BindingTestHelper<'a> {
    registry: &'a TypeRegistry,
    pub default_extension_parameters: Vec<ExtensionParameter>,
    pub imports: Vec<NamespaceImport>,
}

impl<'a> BindingTestHelper<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        let wk = registry.well_known();
        BindingTestHelper {
            registry,
            default_extension_parameters: vec![
                ExtensionParameter::new("_index", wk.int, "$index()"),
                ExtensionParameter::new("_page", wk.object, "velm.pageInfo"),
            ],
            imports: Vec::new(),
        }
    }

    pub fn with_imports(mut self, imports: Vec<NamespaceImport>) -> Self {
        self.imports = imports;
        self
    }

    /// Creates a `DataContextStack` from a hierarchy of contexts. The first
    /// element becomes `_root`, the last `_this`; extra extension parameters
    /// and the defaults land on the root frame.
    pub fn create_data_context(
        &self,
        contexts: &[TypeId],
        extension_parameters: Vec<ExtensionParameter>,
    ) -> DataContextStack {
        let wk = self.registry.well_known();
        let mut all_parameters = extension_parameters;
        all_parameters.extend(self.default_extension_parameters.iter().cloned());

        let root_type = contexts.first().copied().unwrap_or(wk.object);
        let mut stack =
            DataContextStack::create(root_type, None, all_parameters, self.imports.clone());
        for context in contexts.iter().skip(1) {
            stack = DataContextStack::create(*context, Some(&stack), Vec::new(), Vec::new());
        }
        stack
    }

    /// Parses, binds, converts to the expected type (with `ToString`
    /// allowed, as value bindings do) and folds constants.
    pub fn parse_binding(
        &self,
        expression: &str,
        context: &DataContextStack,
        expected_type: Option<TypeId>,
    ) -> Result<TypedExpr, BindingError> {
        let wk = self.registry.well_known();
        let parsed = parse_expression(expression)?;
        let options = BindingParserOptions::with_imports(self.imports.clone());
        let bound = Binder::new(self.registry).bind_with_expected_type(
            expression,
            &parsed,
            context,
            &options,
            expected_type.unwrap_or(wk.object),
            true,
        )?;
        fold_constants(self.registry, bound, expression)
    }

    /// Parses a binding and evaluates it against the view-model stack
    /// (root-first, matching `create_data_context`).
    pub fn execute_binding(
        &self,
        expression: &str,
        context: &DataContextStack,
        view_models: &[Value],
    ) -> Result<Value, TestBindingError> {
        let bound = self.parse_binding(expression, context, None)?;
        let ctx = EvalContext::new(view_models);
        Ok(Evaluator::new(self.registry).evaluate(&bound, &ctx)?)
    }
}
