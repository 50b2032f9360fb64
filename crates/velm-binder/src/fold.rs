//! Constant folding and lambda substitution.
//!
//! A bottom-up pass over the typed tree. Member accesses and operators whose
//! operands already folded to constants are replaced by the computed
//! constant; side-effecting constructs (method and delegate calls) are never
//! folded. A lambda invoked with pure arguments beta-reduces. Folding a
//! member access on a constant null is a compile-time error, which is how
//! statically-known null dereferences are caught before the client ever
//! sees the binding.

use rustc_hash::FxHashSet;

use velm_common::types::TypeRegistry;
use velm_common::value::Value;
use velm_parser::ast::BinaryOperator;

use crate::bind::BindingError;
use crate::convert::render_constant;
use crate::ops::{apply_binary, apply_unary};
use crate::typed::{ConversionKind, TypedExpr};

pub fn fold_constants(
    registry: &TypeRegistry,
    expr: TypedExpr,
    expression: &str,
) -> Result<TypedExpr, BindingError> {
    Ok(match expr {
        TypedExpr::Constant { .. }
        | TypedExpr::ViewModel { .. }
        | TypedExpr::ExtensionParameter { .. }
        | TypedExpr::LambdaParameter { .. }
        | TypedExpr::StaticTypeRef { .. } => expr,

        TypedExpr::Member { target, name, ty } => {
            let target = fold_constants(registry, *target, expression)?;
            if let TypedExpr::Constant { value, .. } = &target {
                match value {
                    Value::Null => {
                        return Err(BindingError::ConstantNullDereference {
                            member: name,
                            expression: expression.to_string(),
                        });
                    }
                    Value::Object(obj) => {
                        if let Some(field) = obj.get(&name) {
                            return Ok(TypedExpr::Constant { value: field.clone(), ty });
                        }
                    }
                    Value::Array(items) if name == "Length" => {
                        return Ok(TypedExpr::Constant { value: Value::Int(items.len() as i64), ty });
                    }
                    Value::String(s) if name == "Length" => {
                        return Ok(TypedExpr::Constant {
                            value: Value::Int(s.chars().count() as i64),
                            ty,
                        });
                    }
                    _ => {}
                }
            }
            TypedExpr::Member { target: Box::new(target), name, ty }
        }

        TypedExpr::Index { target, index, ty } => {
            let target = fold_constants(registry, *target, expression)?;
            let index = fold_constants(registry, *index, expression)?;
            if let (
                TypedExpr::Constant { value: Value::Array(items), .. },
                TypedExpr::Constant { value: Value::Int(i), .. },
            ) = (&target, &index)
            {
                if let Some(item) = usize::try_from(*i).ok().and_then(|i| items.get(i)) {
                    return Ok(TypedExpr::Constant { value: item.clone(), ty });
                }
            }
            TypedExpr::Index { target: Box::new(target), index: Box::new(index), ty }
        }

        TypedExpr::Binary { operator, left, right, ty } => {
            let left = fold_constants(registry, *left, expression)?;
            let right = fold_constants(registry, *right, expression)?;
            fold_binary(operator, left, right, ty)
        }

        TypedExpr::Unary { operator, operand, ty } => {
            let operand = fold_constants(registry, *operand, expression)?;
            if let TypedExpr::Constant { value, .. } = &operand {
                if let Some(folded) = apply_unary(operator, value) {
                    return Ok(TypedExpr::Constant { value: folded, ty });
                }
            }
            TypedExpr::Unary { operator, operand: Box::new(operand), ty }
        }

        TypedExpr::Conditional { condition, when_true, when_false, ty } => {
            let condition = fold_constants(registry, *condition, expression)?;
            // The untaken branch would never have been evaluated, dropping
            // it preserves semantics.
            if let TypedExpr::Constant { value: Value::Bool(b), .. } = &condition {
                let chosen = if *b { *when_true } else { *when_false };
                return fold_constants(registry, chosen, expression);
            }
            TypedExpr::Conditional {
                condition: Box::new(condition),
                when_true: Box::new(fold_constants(registry, *when_true, expression)?),
                when_false: Box::new(fold_constants(registry, *when_false, expression)?),
                ty,
            }
        }

        TypedExpr::Convert { operand, to, kind } => {
            let source_type = operand.type_of();
            let operand = fold_constants(registry, *operand, expression)?;
            if let TypedExpr::Constant { value, .. } = &operand {
                let folded = match kind {
                    // Representation does not change; the constant keeps its
                    // more precise source type (an enum stays an enum).
                    ConversionKind::Identity => return Ok(operand),
                    ConversionKind::NumericWiden => value.as_int().map(|i| Value::Double(i as f64)),
                    ConversionKind::ToString => {
                        Some(Value::String(render_constant(registry, value, source_type)))
                    }
                };
                if let Some(value) = folded {
                    return Ok(TypedExpr::Constant { value, ty: to });
                }
            }
            TypedExpr::Convert { operand: Box::new(operand), to, kind }
        }

        TypedExpr::Invoke { target, arguments, ty } => {
            let target = fold_constants(registry, *target, expression)?;
            let arguments = arguments
                .into_iter()
                .map(|a| fold_constants(registry, a, expression))
                .collect::<Result<Vec<_>, _>>()?;
            if let TypedExpr::Lambda { parameters, body, .. } = &target {
                if arguments.iter().all(|a| a.is_pure()) {
                    let substituted = substitute(*body.clone(), parameters, &arguments);
                    return fold_constants(registry, substituted, expression);
                }
            }
            TypedExpr::Invoke { target: Box::new(target), arguments, ty }
        }

        TypedExpr::MethodCall { method, target, arguments, ty } => TypedExpr::MethodCall {
            method,
            target: match target {
                Some(t) => Some(Box::new(fold_constants(registry, *t, expression)?)),
                None => None,
            },
            arguments: arguments
                .into_iter()
                .map(|a| fold_constants(registry, a, expression))
                .collect::<Result<Vec<_>, _>>()?,
            ty,
        },

        TypedExpr::Lambda { parameters, body, ty } => TypedExpr::Lambda {
            parameters,
            body: Box::new(fold_constants(registry, *body, expression)?),
            ty,
        },
    })
}

fn fold_binary(
    operator: BinaryOperator,
    left: TypedExpr,
    right: TypedExpr,
    ty: velm_common::types::TypeId,
) -> TypedExpr {
    use BinaryOperator as Op;

    if let (TypedExpr::Constant { value: l, .. }, TypedExpr::Constant { value: r, .. }) =
        (&left, &right)
    {
        if let Some(folded) = apply_binary(operator, l, r) {
            return TypedExpr::Constant { value: folded, ty };
        }
    }

    // Short-circuit rewrites that keep evaluation order intact. `false && x`
    // only folds away `x` when `x` is pure.
    match (operator, &left, &right) {
        (Op::And, TypedExpr::Constant { value: Value::Bool(true), .. }, _) => return right,
        (Op::And, TypedExpr::Constant { value: Value::Bool(false), .. }, _) if right.is_pure() => {
            return TypedExpr::Constant { value: Value::Bool(false), ty };
        }
        (Op::Or, TypedExpr::Constant { value: Value::Bool(false), .. }, _) => return right,
        (Op::Or, TypedExpr::Constant { value: Value::Bool(true), .. }, _) if right.is_pure() => {
            return TypedExpr::Constant { value: Value::Bool(true), ty };
        }
        (Op::NullCoalesce, TypedExpr::Constant { value: Value::Null, .. }, _) => return right,
        (Op::NullCoalesce, TypedExpr::Constant { .. }, _) => return left,
        _ => {}
    }

    TypedExpr::Binary { operator, left: Box::new(left), right: Box::new(right), ty }
}

/// Beta reduction: replaces references to `parameters` in `body` with the
/// corresponding argument expressions, respecting shadowing by nested
/// lambdas.
fn substitute(
    body: TypedExpr,
    parameters: &[(String, velm_common::types::TypeId)],
    arguments: &[TypedExpr],
) -> TypedExpr {
    let mut shadowed = FxHashSet::default();
    substitute_inner(body, parameters, arguments, &mut shadowed)
}

fn substitute_inner(
    expr: TypedExpr,
    parameters: &[(String, velm_common::types::TypeId)],
    arguments: &[TypedExpr],
    shadowed: &mut FxHashSet<String>,
) -> TypedExpr {
    match expr {
        TypedExpr::LambdaParameter { ref name, .. } if !shadowed.contains(name) => {
            match parameters.iter().position(|(n, _)| n == name) {
                Some(i) => arguments.get(i).cloned().unwrap_or(expr),
                None => expr,
            }
        }
        TypedExpr::LambdaParameter { .. } => expr,
        TypedExpr::Lambda { parameters: inner_params, body, ty } => {
            let newly_shadowed: Vec<String> = inner_params
                .iter()
                .filter(|(n, _)| shadowed.insert(n.clone()))
                .map(|(n, _)| n.clone())
                .collect();
            let body = substitute_inner(*body, parameters, arguments, shadowed);
            for name in newly_shadowed {
                shadowed.remove(&name);
            }
            TypedExpr::Lambda { parameters: inner_params, body: Box::new(body), ty }
        }
        TypedExpr::Member { target, name, ty } => TypedExpr::Member {
            target: Box::new(substitute_inner(*target, parameters, arguments, shadowed)),
            name,
            ty,
        },
        TypedExpr::Index { target, index, ty } => TypedExpr::Index {
            target: Box::new(substitute_inner(*target, parameters, arguments, shadowed)),
            index: Box::new(substitute_inner(*index, parameters, arguments, shadowed)),
            ty,
        },
        TypedExpr::MethodCall { method, target, arguments: args, ty } => TypedExpr::MethodCall {
            method,
            target: target.map(|t| Box::new(substitute_inner(*t, parameters, arguments, shadowed))),
            arguments: args
                .into_iter()
                .map(|a| substitute_inner(a, parameters, arguments, shadowed))
                .collect(),
            ty,
        },
        TypedExpr::Invoke { target, arguments: args, ty } => TypedExpr::Invoke {
            target: Box::new(substitute_inner(*target, parameters, arguments, shadowed)),
            arguments: args
                .into_iter()
                .map(|a| substitute_inner(a, parameters, arguments, shadowed))
                .collect(),
            ty,
        },
        TypedExpr::Binary { operator, left, right, ty } => TypedExpr::Binary {
            operator,
            left: Box::new(substitute_inner(*left, parameters, arguments, shadowed)),
            right: Box::new(substitute_inner(*right, parameters, arguments, shadowed)),
            ty,
        },
        TypedExpr::Unary { operator, operand, ty } => TypedExpr::Unary {
            operator,
            operand: Box::new(substitute_inner(*operand, parameters, arguments, shadowed)),
            ty,
        },
        TypedExpr::Conditional { condition, when_true, when_false, ty } => TypedExpr::Conditional {
            condition: Box::new(substitute_inner(*condition, parameters, arguments, shadowed)),
            when_true: Box::new(substitute_inner(*when_true, parameters, arguments, shadowed)),
            when_false: Box::new(substitute_inner(*when_false, parameters, arguments, shadowed)),
            ty,
        },
        TypedExpr::Convert { operand, to, kind } => TypedExpr::Convert {
            operand: Box::new(substitute_inner(*operand, parameters, arguments, shadowed)),
            to,
            kind,
        },
        other => other,
    }
}
