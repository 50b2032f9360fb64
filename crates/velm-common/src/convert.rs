//! Runtime value conversion.
//!
//! `convert_value` is the loose, culture-invariant conversion used when
//! binding attribute literals and command arguments to declared types:
//! strings parse into numbers, enums (including comma-separated flag
//! combinations), booleans and arrays; nulls become the target's default.

use thiserror::Error;

use crate::types::{TypeId, TypeKind, TypeRegistry};
use crate::value::Value;

#[derive(Debug, Error)]
#[error("can not convert value '{value}' to {type_name}: {reason}")]
pub struct TypeConvertError {
    pub value: String,
    pub type_name: String,
    pub reason: String,
}

impl TypeConvertError {
    fn new(registry: &TypeRegistry, value: &Value, target: TypeId, reason: impl Into<String>) -> Self {
        TypeConvertError {
            value: value.to_string(),
            type_name: registry.name_of(target),
            reason: reason.into(),
        }
    }
}

/// Converts `value` to the target type, mirroring the framework's loose
/// conversion rules. Returns the converted value or a conversion error
/// wrapping the cause.
pub fn convert_value(
    registry: &TypeRegistry,
    value: &Value,
    target: TypeId,
) -> Result<Value, TypeConvertError> {
    // Nulls become the target's default value.
    if value.is_null() {
        return Ok(registry.default_value(target));
    }

    if conforms(registry, value, target) {
        return Ok(value.clone());
    }

    let target_kind = registry
        .get(target)
        .map(|d| d.kind.clone())
        .ok_or_else(|| TypeConvertError::new(registry, value, target, "unknown target type"))?;

    // Nullable targets: an empty string means null, otherwise convert to the
    // inner type.
    if let TypeKind::Nullable(inner) = target_kind {
        if matches!(value, Value::String(s) if s.is_empty()) {
            return Ok(Value::Null);
        }
        return convert_value(registry, value, inner);
    }

    if matches!(target_kind, TypeKind::Object) {
        return Ok(value.clone());
    }

    // Enums parse from strings; flag enums accumulate comma/pipe-separated
    // member values by bit-or.
    if let TypeKind::Enum { flags, .. } = target_kind {
        match value {
            Value::String(text) => {
                let parts: Vec<&str> = text.split(['|', ',']).collect();
                if !flags && parts.len() > 1 {
                    return Err(TypeConvertError::new(
                        registry,
                        value,
                        target,
                        "the enum does not allow multiple values",
                    ));
                }
                let mut result = 0_i64;
                for part in parts {
                    match registry.enum_member_value(target, part.trim()) {
                        Some(member) => result |= member,
                        None => {
                            return Err(TypeConvertError::new(
                                registry,
                                value,
                                target,
                                format!("the enum does not allow a value '{}'", part.trim()),
                            ));
                        }
                    }
                }
                return Ok(Value::Int(result));
            }
            Value::Int(i) => return Ok(Value::Int(*i)),
            _ => {}
        }
    }

    // Anything converts to string through its display form; enum values
    // render as member names.
    if matches!(target_kind, TypeKind::String) {
        return Ok(Value::String(value.to_string()));
    }

    // Comma-separated strings convert to arrays element-wise.
    if let TypeKind::Array(element) = target_kind {
        if let Value::String(text) = value {
            let items = text
                .split(',')
                .map(|part| convert_value(registry, &Value::String(part.trim().to_string()), element))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(items));
        }
    }

    if let Value::String(text) = value {
        let text = text.trim();
        match target_kind {
            TypeKind::Bool => {
                return text
                    .to_ascii_lowercase()
                    .parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|e| TypeConvertError::new(registry, value, target, e.to_string()));
            }
            TypeKind::Int => {
                return text
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| TypeConvertError::new(registry, value, target, e.to_string()));
            }
            TypeKind::Double => {
                return text
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| TypeConvertError::new(registry, value, target, e.to_string()));
            }
            _ => {}
        }

        // Custom primitive types parse through their registered hook.
        if let Some(parser) = registry.custom_primitive_parser(target) {
            return parser(text).ok_or_else(|| {
                TypeConvertError::new(
                    registry,
                    value,
                    target,
                    "the try-parse hook of the custom primitive type failed to parse the value",
                )
            });
        }
    }

    // Numeric widening and narrowing.
    match (&target_kind, value) {
        (TypeKind::Double, Value::Int(i)) => return Ok(Value::Double(*i as f64)),
        (TypeKind::Int, Value::Double(d)) => return Ok(Value::Int(d.round() as i64)),
        (TypeKind::Int, Value::Bool(b)) => return Ok(Value::Int(*b as i64)),
        _ => {}
    }

    Err(TypeConvertError::new(registry, value, target, "no conversion path exists"))
}

/// Structural "is instance of" check between a runtime value and a type.
pub fn conforms(registry: &TypeRegistry, value: &Value, type_id: TypeId) -> bool {
    let Some(kind) = registry.get(type_id).map(|d| d.kind.clone()) else {
        return false;
    };
    match (&kind, value) {
        (TypeKind::Object, v) => !matches!(v, Value::Service(_)),
        (TypeKind::Bool, Value::Bool(_)) => true,
        (TypeKind::Int, Value::Int(_)) => true,
        (TypeKind::Double, Value::Double(_)) => true,
        (TypeKind::String, Value::String(_)) => true,
        (TypeKind::Enum { .. }, Value::Int(_)) => true,
        (TypeKind::Nullable(inner), v) => v.is_null() || conforms(registry, v, *inner),
        (TypeKind::Array(element), Value::Array(items)) => {
            items.iter().all(|i| i.is_null() || conforms(registry, i, *element))
        }
        (TypeKind::Class { .. } | TypeKind::Interface, Value::Object(obj)) => {
            match &obj.type_name {
                Some(name) => registry
                    .find_by_name(name)
                    .is_some_and(|actual| registry.is_assignable_from(type_id, actual)),
                // Untyped objects conform structurally.
                None => true,
            }
        }
        (TypeKind::Class { .. } | TypeKind::Interface, Value::Null) => true,
        _ => false,
    }
}
