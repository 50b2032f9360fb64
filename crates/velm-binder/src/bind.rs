//! Identifier and member resolution.
//!
//! Resolution order for a bare identifier: enclosing lambda parameters,
//! extension parameters of the current and ancestor frames (innermost wins),
//! the special context names (`_this`, `_parent`, `_parentN`, `_root`),
//! members of the current context type, then imported namespaces and static
//! members.

use thiserror::Error;

use velm_common::types::{MemberRef, MethodDescriptor, TypeId, TypeKind, TypeRegistry};
use velm_common::value::Value;
use velm_parser::ast::{Expr, ExprKind, Literal};

use crate::context::{DataContextStack, NamespaceImport};
use crate::convert::{ensure_implicit_conversion, magic_lambda_conversion};
use crate::typed::TypedExpr;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error(transparent)]
    Parse(#[from] velm_parser::ParseError),
    #[error("could not resolve identifier '{name}' in data context of type {context_type} (expression: {expression})")]
    UnresolvedIdentifier { name: String, context_type: String, expression: String },
    #[error("type {type_name} has no member '{member}' (expression: {expression})")]
    UnknownMember { member: String, type_name: String, expression: String },
    #[error("no overload of {type_name}.{method} matches the call (expression: {expression})")]
    UnresolvedMethod { method: String, type_name: String, expression: String },
    #[error("cannot convert an expression of type {from} to {to} (expression: {expression})")]
    NoConversion { from: String, to: String, expression: String },
    #[error("{construct} is not supported in binding expressions (expression: {expression})")]
    NotSupported { construct: String, expression: String },
    #[error("member '{member}' is accessed on a compile-time constant null value (expression: {expression})")]
    ConstantNullDereference { member: String, expression: String },
    #[error("operator '{operator}' cannot be applied to operands of type {left} and {right} (expression: {expression})")]
    OperatorType { operator: String, left: String, right: String, expression: String },
}

/// Options influencing identifier resolution.
#[derive(Clone, Debug, Default)]
pub struct BindingParserOptions {
    pub imports: Vec<NamespaceImport>,
}

impl BindingParserOptions {
    pub fn with_imports(imports: Vec<NamespaceImport>) -> Self {
        BindingParserOptions { imports }
    }
}

pub struct Binder<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Binder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Binder { registry }
    }

    /// Binds a parsed expression against the context stack.
    pub fn bind(
        &self,
        expression_text: &str,
        expr: &Expr,
        context: &DataContextStack,
        options: &BindingParserOptions,
    ) -> Result<TypedExpr, BindingError> {
        let mut state = BindState {
            registry: self.registry,
            context,
            options,
            expression: expression_text,
            lambda_scopes: Vec::new(),
        };
        state.bind_expr(expr)
    }

    /// Binds and converts to the expected result type: an exact match passes
    /// through, then the magic lambda conversion, then standard implicit
    /// conversions, finally `ToString` when allowed.
    pub fn bind_with_expected_type(
        &self,
        expression_text: &str,
        expr: &Expr,
        context: &DataContextStack,
        options: &BindingParserOptions,
        expected: TypeId,
        allow_to_string: bool,
    ) -> Result<TypedExpr, BindingError> {
        tracing::trace!(expression = expression_text, "compiling binding expression");
        let mut state = BindState {
            registry: self.registry,
            context,
            options,
            expression: expression_text,
            lambda_scopes: Vec::new(),
        };

        // A lambda literal binds directly against the expected delegate.
        if let ExprKind::Lambda { parameters, body } = &expr.kind {
            if let Some(TypeKind::Delegate { parameters: param_types, return_type }) =
                self.registry.get(expected).map(|d| d.kind.clone())
            {
                return state.bind_lambda(parameters, body, &param_types, return_type, expected);
            }
        }

        let bound = state.bind_expr(expr)?;
        if let Some(lambda) =
            magic_lambda_conversion(self.registry, &bound, expected, expression_text)?
        {
            return Ok(lambda);
        }
        ensure_implicit_conversion(self.registry, bound, expected, allow_to_string, expression_text)
    }
}

struct BindState<'a> {
    registry: &'a TypeRegistry,
    context: &'a DataContextStack,
    options: &'a BindingParserOptions,
    expression: &'a str,
    lambda_scopes: Vec<Vec<(String, TypeId)>>,
}

impl<'a> BindState<'a> {
    fn bind_expr(&mut self, expr: &Expr) -> Result<TypedExpr, BindingError> {
        let wk = self.registry.well_known();
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Null => TypedExpr::Constant { value: Value::Null, ty: wk.object },
                Literal::Bool(b) => TypedExpr::Constant { value: Value::Bool(*b), ty: wk.boolean },
                Literal::Int(i) => TypedExpr::Constant { value: Value::Int(*i), ty: wk.int },
                Literal::Double(d) => {
                    TypedExpr::Constant { value: Value::Double(*d), ty: wk.double }
                }
                Literal::String(s) => {
                    TypedExpr::Constant { value: Value::String(s.clone()), ty: wk.string }
                }
            }),
            ExprKind::Identifier(name) => self.resolve_identifier(name),
            ExprKind::Member { target, name } => {
                let bound_target = self.bind_target(target)?;
                self.bind_member(bound_target, name)
            }
            ExprKind::Index { target, index } => {
                let target = self.bind_expr(target)?;
                let index = self.bind_expr(index)?;
                let index = ensure_implicit_conversion(
                    self.registry,
                    index,
                    wk.int,
                    false,
                    self.expression,
                )?;
                let element = match self
                    .registry
                    .get(self.registry.unwrap_nullable(target.type_of()))
                    .map(|d| d.kind.clone())
                {
                    Some(TypeKind::Array(element)) => element,
                    _ => {
                        return Err(BindingError::NotSupported {
                            construct: format!(
                                "indexing a value of type {}",
                                self.registry.name_of(target.type_of())
                            ),
                            expression: self.expression.to_string(),
                        });
                    }
                };
                Ok(TypedExpr::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                    ty: element,
                })
            }
            ExprKind::Call { target, arguments } => self.bind_call(target, arguments),
            ExprKind::Binary { operator, left, right } => {
                let left = self.bind_expr(left)?;
                let right = self.bind_expr(right)?;
                self.bind_binary(*operator, left, right)
            }
            ExprKind::Unary { operator, operand } => {
                let operand = self.bind_expr(operand)?;
                self.bind_unary(*operator, operand)
            }
            ExprKind::Conditional { condition, when_true, when_false } => {
                let condition = self.bind_expr(condition)?;
                let condition = ensure_implicit_conversion(
                    self.registry,
                    condition,
                    wk.boolean,
                    false,
                    self.expression,
                )?;
                let when_true = self.bind_expr(when_true)?;
                let when_false = self.bind_expr(when_false)?;
                self.bind_conditional(condition, when_true, when_false)
            }
            ExprKind::Lambda { .. } => Err(BindingError::NotSupported {
                construct: "a lambda without an expected delegate type".to_string(),
                expression: self.expression.to_string(),
            }),
        }
    }

    fn bind_lambda(
        &mut self,
        parameters: &[String],
        body: &Expr,
        parameter_types: &[TypeId],
        return_type: TypeId,
        delegate_type: TypeId,
    ) -> Result<TypedExpr, BindingError> {
        if parameters.len() != parameter_types.len() {
            return Err(BindingError::NoConversion {
                from: format!("a lambda with {} parameters", parameters.len()),
                to: self.registry.name_of(delegate_type),
                expression: self.expression.to_string(),
            });
        }
        let scope: Vec<(String, TypeId)> = parameters
            .iter()
            .cloned()
            .zip(parameter_types.iter().copied())
            .collect();
        self.lambda_scopes.push(scope.clone());
        let body = self.bind_expr(body);
        self.lambda_scopes.pop();
        let body =
            ensure_implicit_conversion(self.registry, body?, return_type, false, self.expression)?;
        Ok(TypedExpr::Lambda { parameters: scope, body: Box::new(body), ty: delegate_type })
    }

    fn resolve_identifier(&mut self, name: &str) -> Result<TypedExpr, BindingError> {
        // Enclosing lambda parameters shadow everything.
        for scope in self.lambda_scopes.iter().rev() {
            if let Some((param_name, ty)) = scope.iter().find(|(n, _)| n == name) {
                return Ok(TypedExpr::LambdaParameter { name: param_name.clone(), ty: *ty });
            }
        }

        // Extension parameters of the current and ancestor frames.
        if let Some((parameter, levels)) = self.context.find_extension_parameter(name) {
            return Ok(TypedExpr::ExtensionParameter {
                name: parameter.name,
                ancestor_levels: levels,
                ty: parameter.parameter_type,
                client_expression: parameter.client_expression,
            });
        }

        // Special context names.
        if let Some(levels) = special_context_levels(name, self.context) {
            if let Some(ty) = self.context.ancestor_type(levels) {
                return Ok(TypedExpr::ViewModel { ancestor_levels: levels, ty });
            }
            return Err(self.unresolved(name));
        }

        // Members of the current context type.
        let this_type = self.context.data_context_type();
        if let Some(MemberRef::Property(property)) = self.registry.resolve_member(this_type, name) {
            return Ok(TypedExpr::Member {
                target: Box::new(TypedExpr::ViewModel { ancestor_levels: 0, ty: this_type }),
                name: property.name.clone(),
                ty: property.property_type,
            });
        }

        // Imported static types (usable as member-access targets).
        if let Some(ty) = self.resolve_static_type(name) {
            return Ok(TypedExpr::StaticTypeRef { ty });
        }

        Err(self.unresolved(name))
    }

    fn unresolved(&self, name: &str) -> BindingError {
        BindingError::UnresolvedIdentifier {
            name: name.to_string(),
            context_type: self.registry.name_of(self.context.data_context_type()),
            expression: self.expression.to_string(),
        }
    }

    /// Binds an expression in target position; a dotted path that does not
    /// resolve as a value may still name a static type.
    fn bind_target(&mut self, expr: &Expr) -> Result<TypedExpr, BindingError> {
        match self.bind_expr(expr) {
            Ok(bound) => Ok(bound),
            Err(original) => {
                if let Some(path) = dotted_path(expr) {
                    if let Some(ty) = self.resolve_static_type(&path) {
                        return Ok(TypedExpr::StaticTypeRef { ty });
                    }
                }
                Err(original)
            }
        }
    }

    fn resolve_static_type(&self, path: &str) -> Option<TypeId> {
        if let Some(id) = self.registry.find_by_name_ignore_case(path) {
            return Some(id);
        }
        let context_imports = self.context.all_namespace_imports();
        for import in self.options.imports.iter().chain(context_imports.iter()) {
            let candidate = if import.alias.as_deref() == Some(path) {
                import.namespace.clone()
            } else {
                format!("{}.{}", import.namespace, path)
            };
            if let Some(id) = self.registry.find_by_name_ignore_case(&candidate) {
                return Some(id);
            }
        }
        None
    }

    fn bind_member(&mut self, target: TypedExpr, name: &str) -> Result<TypedExpr, BindingError> {
        let wk = self.registry.well_known();
        if let TypedExpr::StaticTypeRef { ty } = &target {
            // Enum members fold to constants immediately.
            if let Some(value) = self.registry.enum_member_value(*ty, name) {
                return Ok(TypedExpr::Constant { value: Value::Int(value), ty: *ty });
            }
            if let Some(MemberRef::Property(property)) = self.registry.resolve_member(*ty, name) {
                return Ok(TypedExpr::Member {
                    target: Box::new(target),
                    name: property.name.clone(),
                    ty: property.property_type,
                });
            }
            return Err(BindingError::UnknownMember {
                member: name.to_string(),
                type_name: self.registry.name_of(*ty),
                expression: self.expression.to_string(),
            });
        }

        let target_type = self.registry.unwrap_nullable(target.type_of());
        let kind = self.registry.get(target_type).map(|d| d.kind.clone());

        // Arrays and strings expose Length.
        if name == "Length"
            && matches!(kind, Some(TypeKind::Array(_)) | Some(TypeKind::String))
        {
            return Ok(TypedExpr::Member { target: Box::new(target), name: name.to_string(), ty: wk.int });
        }

        match self.registry.resolve_member(target_type, name) {
            Some(MemberRef::Property(property)) => Ok(TypedExpr::Member {
                target: Box::new(target),
                name: property.name.clone(),
                ty: property.property_type,
            }),
            Some(MemberRef::Method(_)) => Err(BindingError::NotSupported {
                construct: format!("using method '{name}' as a value"),
                expression: self.expression.to_string(),
            }),
            None => Err(BindingError::UnknownMember {
                member: name.to_string(),
                type_name: self.registry.name_of(target_type),
                expression: self.expression.to_string(),
            }),
        }
    }

    fn bind_call(&mut self, target: &Expr, arguments: &[Expr]) -> Result<TypedExpr, BindingError> {
        match &target.kind {
            ExprKind::Member { target: member_target, name } => {
                let bound_target = self.bind_target(member_target)?;
                match &bound_target {
                    TypedExpr::StaticTypeRef { ty } => {
                        let candidates: Vec<_> = self
                            .registry
                            .find_methods(*ty, name)
                            .into_iter()
                            .filter(|m| m.is_static)
                            .collect();
                        self.bind_overload(*ty, name, candidates, None, arguments)
                    }
                    _ => {
                        let owner = self.registry.unwrap_nullable(bound_target.type_of());
                        let candidates: Vec<_> = self
                            .registry
                            .find_methods(owner, name)
                            .into_iter()
                            .filter(|m| !m.is_static)
                            .collect();
                        self.bind_overload(owner, name, candidates, Some(bound_target), arguments)
                    }
                }
            }
            ExprKind::Identifier(name) => {
                // A bare call resolves against the current context type; a
                // delegate-typed identifier is invoked instead.
                let this_type = self.context.data_context_type();
                let instance_methods: Vec<_> = self
                    .registry
                    .find_methods(this_type, name)
                    .into_iter()
                    .filter(|m| !m.is_static)
                    .collect();
                if !instance_methods.is_empty() {
                    let this = TypedExpr::ViewModel { ancestor_levels: 0, ty: this_type };
                    return self.bind_overload(this_type, name, instance_methods, Some(this), arguments);
                }
                let bound = self.bind_expr(target)?;
                self.bind_invoke(bound, arguments)
            }
            _ => {
                let bound = self.bind_expr(target)?;
                self.bind_invoke(bound, arguments)
            }
        }
    }

    fn bind_invoke(
        &mut self,
        target: TypedExpr,
        arguments: &[Expr],
    ) -> Result<TypedExpr, BindingError> {
        let Some(TypeKind::Delegate { parameters, return_type }) =
            self.registry.get(target.type_of()).map(|d| d.kind.clone())
        else {
            return Err(BindingError::NotSupported {
                construct: format!("calling a value of type {}", self.registry.name_of(target.type_of())),
                expression: self.expression.to_string(),
            });
        };
        if parameters.len() != arguments.len() {
            return Err(BindingError::NoConversion {
                from: format!("{} arguments", arguments.len()),
                to: self.registry.name_of(target.type_of()),
                expression: self.expression.to_string(),
            });
        }
        let mut bound_args = Vec::new();
        for (argument, param_type) in arguments.iter().zip(parameters.iter()) {
            bound_args.push(self.bind_argument(argument, *param_type)?);
        }
        Ok(TypedExpr::Invoke {
            target: Box::new(target),
            arguments: bound_args,
            ty: return_type,
        })
    }

    /// Tries each overload in turn; the first whose arguments bind wins.
    fn bind_overload(
        &mut self,
        owner: TypeId,
        name: &str,
        candidates: Vec<std::sync::Arc<MethodDescriptor>>,
        target: Option<TypedExpr>,
        arguments: &[Expr],
    ) -> Result<TypedExpr, BindingError> {
        let mut last_error = None;
        for method in candidates {
            // Injected parameters are supplied by the runtime, defaulted
            // parameters may be omitted from the call.
            let callable: Vec<_> = method.parameters.iter().filter(|p| !p.inject).collect();
            let required = callable.iter().filter(|p| p.default_value.is_none()).count();
            if arguments.len() < required || arguments.len() > callable.len() {
                continue;
            }

            let mut bound_args = Vec::new();
            let mut failed = None;
            for parameter in &method.parameters {
                if parameter.inject {
                    continue;
                }
                let position = bound_args.len();
                if let Some(argument) = arguments.get(position) {
                    match self.bind_argument(argument, parameter.parameter_type) {
                        Ok(bound) => bound_args.push(bound),
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                } else if let Some(default) = &parameter.default_value {
                    bound_args.push(TypedExpr::Constant {
                        value: default.clone(),
                        ty: parameter.parameter_type,
                    });
                }
            }
            match failed {
                Some(e) => last_error = Some(e),
                None => {
                    let ty = method.return_type;
                    return Ok(TypedExpr::MethodCall {
                        method,
                        target: target.map(Box::new),
                        arguments: bound_args,
                        ty,
                    });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BindingError::UnresolvedMethod {
            method: name.to_string(),
            type_name: self.registry.name_of(owner),
            expression: self.expression.to_string(),
        }))
    }

    fn bind_argument(
        &mut self,
        argument: &Expr,
        parameter_type: TypeId,
    ) -> Result<TypedExpr, BindingError> {
        // Lambda arguments bind against the parameter's delegate type.
        if let ExprKind::Lambda { parameters, body } = &argument.kind {
            if let Some(TypeKind::Delegate { parameters: param_types, return_type }) =
                self.registry.get(parameter_type).map(|d| d.kind.clone())
            {
                return self.bind_lambda(parameters, body, &param_types, return_type, parameter_type);
            }
        }
        let bound = self.bind_expr(argument)?;
        ensure_implicit_conversion(self.registry, bound, parameter_type, false, self.expression)
    }

    fn bind_binary(
        &mut self,
        operator: velm_parser::ast::BinaryOperator,
        left: TypedExpr,
        right: TypedExpr,
    ) -> Result<TypedExpr, BindingError> {
        use velm_parser::ast::BinaryOperator as Op;
        let wk = self.registry.well_known();
        let lt = left.type_of();
        let rt = right.type_of();

        let operator_error = |state: &Self| BindingError::OperatorType {
            operator: operator.symbol().to_string(),
            left: state.registry.name_of(lt),
            right: state.registry.name_of(rt),
            expression: state.expression.to_string(),
        };

        let is_numeric = |ty: TypeId| ty == wk.int || ty == wk.double;

        let result_type = match operator {
            Op::Add if lt == wk.string || rt == wk.string => wk.string,
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Modulo => {
                if !is_numeric(lt) || !is_numeric(rt) {
                    return Err(operator_error(self));
                }
                if lt == wk.double || rt == wk.double { wk.double } else { wk.int }
            }
            Op::Less | Op::LessOrEqual | Op::Greater | Op::GreaterOrEqual => {
                if (is_numeric(lt) && is_numeric(rt)) || (lt == wk.string && rt == wk.string) {
                    wk.boolean
                } else {
                    return Err(operator_error(self));
                }
            }
            Op::Equal | Op::NotEqual => wk.boolean,
            Op::And | Op::Or => {
                if lt != wk.boolean || rt != wk.boolean {
                    return Err(operator_error(self));
                }
                wk.boolean
            }
            Op::NullCoalesce => {
                // A literal null on the left takes the right side's type.
                if matches!(&left, TypedExpr::Constant { value: Value::Null, .. }) {
                    return Ok(TypedExpr::Binary {
                        operator,
                        left: Box::new(TypedExpr::Constant { value: Value::Null, ty: rt }),
                        right: Box::new(right),
                        ty: rt,
                    });
                }
                let unwrapped = self.registry.unwrap_nullable(lt);
                if self.registry.is_assignable_from(rt, unwrapped) {
                    rt
                } else if self.registry.is_assignable_from(unwrapped, rt) {
                    unwrapped
                } else {
                    return Err(operator_error(self));
                }
            }
        };

        Ok(TypedExpr::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            ty: result_type,
        })
    }

    fn bind_unary(
        &mut self,
        operator: velm_parser::ast::UnaryOperator,
        operand: TypedExpr,
    ) -> Result<TypedExpr, BindingError> {
        use velm_parser::ast::UnaryOperator as Op;
        let wk = self.registry.well_known();
        let ty = operand.type_of();
        let result = match operator {
            Op::Not if ty == wk.boolean => wk.boolean,
            Op::Negate if ty == wk.int || ty == wk.double => ty,
            _ => {
                return Err(BindingError::OperatorType {
                    operator: operator.symbol().to_string(),
                    left: self.registry.name_of(ty),
                    right: String::new(),
                    expression: self.expression.to_string(),
                });
            }
        };
        Ok(TypedExpr::Unary { operator, operand: Box::new(operand), ty: result })
    }

    fn bind_conditional(
        &mut self,
        condition: TypedExpr,
        when_true: TypedExpr,
        when_false: TypedExpr,
    ) -> Result<TypedExpr, BindingError> {
        let tt = when_true.type_of();
        let ft = when_false.type_of();
        let true_is_null = matches!(&when_true, TypedExpr::Constant { value: Value::Null, .. });
        let false_is_null = matches!(&when_false, TypedExpr::Constant { value: Value::Null, .. });
        let (when_true, when_false, ty) = if tt == ft {
            (when_true, when_false, tt)
        } else if true_is_null && !false_is_null && crate::convert::accepts_null(self.registry, ft)
        {
            // A literal null branch takes the other branch's type.
            (TypedExpr::Constant { value: Value::Null, ty: ft }, when_false, ft)
        } else if false_is_null && !true_is_null && crate::convert::accepts_null(self.registry, tt)
        {
            (when_true, TypedExpr::Constant { value: Value::Null, ty: tt }, tt)
        } else if let Ok(converted) =
            ensure_implicit_conversion(self.registry, when_true.clone(), ft, false, self.expression)
        {
            (converted, when_false, ft)
        } else {
            let converted =
                ensure_implicit_conversion(self.registry, when_false, tt, false, self.expression)?;
            (when_true, converted, tt)
        };
        Ok(TypedExpr::Conditional {
            condition: Box::new(condition),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
            ty,
        })
    }
}

/// `_this`, `_parent`, `_parentN`, `_root` to ancestor levels.
fn special_context_levels(name: &str, context: &DataContextStack) -> Option<usize> {
    match name {
        "_this" => Some(0),
        "_parent" => Some(1),
        "_root" => Some(context.depth()),
        _ => name
            .strip_prefix("_parent")
            .and_then(|suffix| suffix.parse::<usize>().ok()),
    }
}

/// Renders `a.b.c` chains of identifiers as a dotted path.
fn dotted_path(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Identifier(name) => Some(name.clone()),
        ExprKind::Member { target, name } => {
            let mut path = dotted_path(target)?;
            path.push('.');
            path.push_str(name);
            Some(path)
        }
        _ => None,
    }
}
