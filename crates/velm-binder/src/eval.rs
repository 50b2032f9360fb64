//! Server-side evaluation of bound expressions.
//!
//! This is the compiled-delegate equivalent: a bound (and usually folded)
//! expression is evaluated against concrete view-model values. Resource
//! bindings and tests use it; command invocation goes through the
//! static-command engine instead.

use rustc_hash::FxHashMap;
use thiserror::Error;

use velm_common::services::ServiceProvider;
use velm_common::types::{MethodBody, MethodError, TypeRegistry};
use velm_common::value::Value;
use velm_parser::ast::BinaryOperator;

use crate::convert::render_constant;
use crate::ops::{apply_binary, apply_unary};
use crate::typed::{ConversionKind, TypedExpr};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("null reference while reading member '{member}'")]
    NullReference { member: String },
    #[error("the view model stack has no value {levels} levels above the current context")]
    MissingViewModel { levels: usize },
    #[error("no value was supplied for extension parameter '{name}'")]
    MissingExtensionParameter { name: String },
    #[error("value has no member '{member}'")]
    UnknownMember { member: String },
    #[error("index {index} is out of range (length {length})")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("operator '{operator}' cannot be applied to {left} and {right}")]
    Operator { operator: String, left: String, right: String },
    #[error("no service is registered for parameter '{parameter}'")]
    MissingService { parameter: String },
    #[error("asynchronous method '{method}' cannot run in synchronous evaluation")]
    AsyncMethod { method: String },
    #[error("method invocation failed: {0}")]
    Method(String),
    #[error("{construct} cannot be evaluated")]
    NotSupported { construct: String },
}

/// Concrete values for one evaluation.
pub struct EvalContext<'a> {
    /// Root-first; the last element is the current `_this`.
    pub view_models: &'a [Value],
    pub extension_values: FxHashMap<String, Value>,
    pub services: Option<&'a ServiceProvider>,
}

impl<'a> EvalContext<'a> {
    pub fn new(view_models: &'a [Value]) -> Self {
        EvalContext { view_models, extension_values: FxHashMap::default(), services: None }
    }

    pub fn with_extension_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extension_values.insert(name.into(), value);
        self
    }

    pub fn with_services(mut self, services: &'a ServiceProvider) -> Self {
        self.services = Some(services);
        self
    }
}

pub struct Evaluator<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Evaluator { registry }
    }

    pub fn evaluate(&self, expr: &TypedExpr, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        let mut locals = Vec::new();
        self.eval(expr, ctx, &mut locals)
    }

    fn eval(
        &self,
        expr: &TypedExpr,
        ctx: &EvalContext<'_>,
        locals: &mut Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        match expr {
            TypedExpr::Constant { value, .. } => Ok(value.clone()),

            TypedExpr::ViewModel { ancestor_levels, .. } => {
                let index = ctx
                    .view_models
                    .len()
                    .checked_sub(1 + ancestor_levels)
                    .ok_or(EvalError::MissingViewModel { levels: *ancestor_levels })?;
                Ok(ctx.view_models[index].clone())
            }

            TypedExpr::ExtensionParameter { name, .. } => ctx
                .extension_values
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingExtensionParameter { name: name.clone() }),

            TypedExpr::LambdaParameter { name, .. } => locals
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalError::MissingExtensionParameter { name: name.clone() }),

            TypedExpr::StaticTypeRef { .. } => Err(EvalError::NotSupported {
                construct: "a static type reference".to_string(),
            }),

            TypedExpr::Member { target, name, .. } => {
                let value = self.eval(target, ctx, locals)?;
                match &value {
                    Value::Null => Err(EvalError::NullReference { member: name.clone() }),
                    Value::Object(obj) => obj
                        .get(name)
                        .cloned()
                        .ok_or_else(|| EvalError::UnknownMember { member: name.clone() }),
                    Value::Array(items) if name == "Length" => {
                        Ok(Value::Int(items.len() as i64))
                    }
                    Value::String(s) if name == "Length" => {
                        Ok(Value::Int(s.chars().count() as i64))
                    }
                    _ => Err(EvalError::UnknownMember { member: name.clone() }),
                }
            }

            TypedExpr::Index { target, index, .. } => {
                let target = self.eval(target, ctx, locals)?;
                let index_value = self.eval(index, ctx, locals)?;
                let i = index_value.as_int().ok_or_else(|| EvalError::Operator {
                    operator: "[]".into(),
                    left: target.kind_name().into(),
                    right: index_value.kind_name().into(),
                })?;
                match target {
                    Value::Array(items) => usize::try_from(i)
                        .ok()
                        .and_then(|idx| items.get(idx).cloned())
                        .ok_or(EvalError::IndexOutOfRange { index: i, length: items.len() }),
                    Value::Null => Err(EvalError::NullReference { member: "[]".into() }),
                    other => Err(EvalError::Operator {
                        operator: "[]".into(),
                        left: other.kind_name().into(),
                        right: "int".into(),
                    }),
                }
            }

            TypedExpr::MethodCall { method, target, arguments, .. } => {
                let mut call_args = Vec::new();
                if let Some(target) = target {
                    call_args.push(self.eval(target, ctx, locals)?);
                }
                let mut supplied = arguments.iter();
                for parameter in &method.parameters {
                    if parameter.inject {
                        let service_type = parameter.parameter_type;
                        let service = ctx
                            .services
                            .and_then(|s| s.get(service_type))
                            .ok_or_else(|| EvalError::MissingService {
                                parameter: parameter.name.clone(),
                            })?;
                        call_args.push(Value::Service(service));
                    } else {
                        let argument = supplied.next().ok_or_else(|| EvalError::Method(
                            format!("missing argument for parameter '{}'", parameter.name),
                        ))?;
                        call_args.push(self.eval(argument, ctx, locals)?);
                    }
                }
                match &method.body {
                    MethodBody::Sync(invoke) => invoke(call_args).map_err(|e| match e {
                        MethodError::ModelState(_) => {
                            EvalError::Method("the method reported an invalid model state".into())
                        }
                        MethodError::Invocation(message) => EvalError::Method(message),
                    }),
                    MethodBody::Async(_) => {
                        Err(EvalError::AsyncMethod { method: method.id.clone() })
                    }
                }
            }

            TypedExpr::Invoke { target, arguments, .. } => {
                let TypedExpr::Lambda { parameters, body, .. } = target.as_ref() else {
                    return Err(EvalError::NotSupported {
                        construct: "invoking a non-lambda delegate value".to_string(),
                    });
                };
                let mut bound = Vec::new();
                for ((name, _), argument) in parameters.iter().zip(arguments.iter()) {
                    bound.push((name.clone(), self.eval(argument, ctx, locals)?));
                }
                let depth = locals.len();
                locals.extend(bound);
                let result = self.eval(body, ctx, locals);
                locals.truncate(depth);
                result
            }

            TypedExpr::Binary { operator, left, right, .. } => {
                use BinaryOperator as Op;
                // Short-circuit and null-coalescing operators must not
                // evaluate their right side eagerly.
                match operator {
                    Op::And => {
                        let l = self.eval(left, ctx, locals)?;
                        if l.as_bool() == Some(false) {
                            return Ok(Value::Bool(false));
                        }
                        return self.eval(right, ctx, locals);
                    }
                    Op::Or => {
                        let l = self.eval(left, ctx, locals)?;
                        if l.as_bool() == Some(true) {
                            return Ok(Value::Bool(true));
                        }
                        return self.eval(right, ctx, locals);
                    }
                    Op::NullCoalesce => {
                        let l = self.eval(left, ctx, locals)?;
                        if !l.is_null() {
                            return Ok(l);
                        }
                        return self.eval(right, ctx, locals);
                    }
                    _ => {}
                }
                let l = self.eval(left, ctx, locals)?;
                let r = self.eval(right, ctx, locals)?;
                apply_binary(*operator, &l, &r).ok_or_else(|| EvalError::Operator {
                    operator: operator.symbol().to_string(),
                    left: l.kind_name().to_string(),
                    right: r.kind_name().to_string(),
                })
            }

            TypedExpr::Unary { operator, operand, .. } => {
                let value = self.eval(operand, ctx, locals)?;
                apply_unary(*operator, &value).ok_or_else(|| EvalError::Operator {
                    operator: operator.symbol().to_string(),
                    left: value.kind_name().to_string(),
                    right: String::new(),
                })
            }

            TypedExpr::Conditional { condition, when_true, when_false, .. } => {
                let condition = self.eval(condition, ctx, locals)?;
                if condition.as_bool().ok_or_else(|| EvalError::Operator {
                    operator: "?:".into(),
                    left: condition.kind_name().into(),
                    right: "bool".into(),
                })? {
                    self.eval(when_true, ctx, locals)
                } else {
                    self.eval(when_false, ctx, locals)
                }
            }

            TypedExpr::Lambda { .. } => Err(EvalError::NotSupported {
                construct: "a lambda used as a value".to_string(),
            }),

            TypedExpr::Convert { operand, kind, .. } => {
                let source_type = operand.type_of();
                let value = self.eval(operand, ctx, locals)?;
                Ok(match kind {
                    ConversionKind::Identity => value,
                    ConversionKind::NumericWiden => match value {
                        Value::Int(i) => Value::Double(i as f64),
                        other => other,
                    },
                    ConversionKind::ToString => {
                        Value::String(render_constant(self.registry, &value, source_type))
                    }
                })
            }
        }
    }
}
