//! Expected-result-type conversions over the typed tree.

use velm_common::types::{TypeId, TypeKind, TypeRegistry};
use velm_common::value::Value;

use crate::bind::BindingError;
use crate::typed::{ConversionKind, TypedExpr};

/// Applies the implicit conversion ladder: exact match, null-literal
/// retyping, reference/nullable widening, numeric widening, boxing, and the
/// `ToString` fallback when explicitly allowed.
pub fn ensure_implicit_conversion(
    registry: &TypeRegistry,
    expr: TypedExpr,
    expected: TypeId,
    allow_to_string: bool,
    expression: &str,
) -> Result<TypedExpr, BindingError> {
    let wk = registry.well_known();
    let source = expr.type_of();

    if source == expected {
        return Ok(expr);
    }

    // The null literal converts to anything nullable.
    if let TypedExpr::Constant { value: Value::Null, .. } = &expr {
        if accepts_null(registry, expected) {
            return Ok(TypedExpr::Constant { value: Value::Null, ty: expected });
        }
    }

    // Upcasts, interface conversions and nullable wrapping do not change the
    // runtime representation.
    if registry.is_assignable_from(expected, source) {
        return Ok(TypedExpr::Convert {
            operand: Box::new(expr),
            to: expected,
            kind: ConversionKind::Identity,
        });
    }

    // Integer widening.
    if source == wk.int && expected == wk.double {
        if let TypedExpr::Constant { value: Value::Int(i), .. } = &expr {
            return Ok(TypedExpr::Constant { value: Value::Double(*i as f64), ty: expected });
        }
        return Ok(TypedExpr::Convert {
            operand: Box::new(expr),
            to: expected,
            kind: ConversionKind::NumericWiden,
        });
    }

    // Conversion into Option<T> goes through T first.
    if let Some(TypeKind::Nullable(inner)) = registry.get(expected).map(|d| d.kind.clone()) {
        let converted = ensure_implicit_conversion(registry, expr, inner, false, expression)?;
        return Ok(TypedExpr::Convert {
            operand: Box::new(converted),
            to: expected,
            kind: ConversionKind::Identity,
        });
    }

    if allow_to_string && expected == wk.string && registry.is_primitive(source) {
        if let TypedExpr::Constant { value, ty } = &expr {
            return Ok(TypedExpr::Constant {
                value: Value::String(render_constant(registry, value, *ty)),
                ty: expected,
            });
        }
        return Ok(TypedExpr::Convert {
            operand: Box::new(expr),
            to: expected,
            kind: ConversionKind::ToString,
        });
    }

    Err(BindingError::NoConversion {
        from: registry.name_of(source),
        to: registry.name_of(expected),
        expression: expression.to_string(),
    })
}

/// The "magic" lambda conversion: when the expected type is a delegate and
/// the expression body converts to its return type, the body is wrapped in a
/// lambda ignoring the delegate's parameters. Returns `None` when the
/// conversion does not apply, so the standard ladder can run.
pub fn magic_lambda_conversion(
    registry: &TypeRegistry,
    expr: &TypedExpr,
    expected: TypeId,
    expression: &str,
) -> Result<Option<TypedExpr>, BindingError> {
    let Some(TypeKind::Delegate { parameters, return_type }) =
        registry.get(expected).map(|d| d.kind.clone())
    else {
        return Ok(None);
    };

    if expr.type_of() == expected {
        return Ok(None);
    }
    if matches!(expr, TypedExpr::Lambda { .. }) {
        return Ok(None);
    }

    let Ok(body) =
        ensure_implicit_conversion(registry, expr.clone(), return_type, false, expression)
    else {
        return Ok(None);
    };

    let parameters: Vec<(String, TypeId)> = parameters
        .iter()
        .enumerate()
        .map(|(i, ty)| (format!("arg{i}"), *ty))
        .collect();
    Ok(Some(TypedExpr::Lambda { parameters, body: Box::new(body), ty: expected }))
}

pub(crate) fn accepts_null(registry: &TypeRegistry, ty: TypeId) -> bool {
    matches!(
        registry.get(ty).map(|d| d.kind.clone()),
        Some(
            TypeKind::Object
                | TypeKind::String
                | TypeKind::Class { .. }
                | TypeKind::Interface
                | TypeKind::Array(_)
                | TypeKind::Nullable(_)
                | TypeKind::Delegate { .. }
        )
    )
}

/// Renders a constant for the `ToString` conversion; enum values render as
/// member names.
pub(crate) fn render_constant(registry: &TypeRegistry, value: &Value, ty: TypeId) -> String {
    if let (Some(TypeKind::Enum { .. }), Value::Int(i)) =
        (registry.get(registry.unwrap_nullable(ty)).map(|d| d.kind.clone()), value)
    {
        return registry.enum_value_to_string(registry.unwrap_nullable(ty), *i);
    }
    value.to_string()
}
