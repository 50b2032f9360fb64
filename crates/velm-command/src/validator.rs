//! Automatic argument validation for static commands.
//!
//! Applies the validation rules declared on view-model properties to the
//! deserialized argument values, recursively, recording the intra-argument
//! property path of every failure. The executor later splices these paths
//! with the client-declared validation paths.

use velm_common::types::{MethodDescriptor, TypeId, TypeKind, TypeRegistry};
use velm_common::validation::{StaticCommandModelState, check_rule};
use velm_common::value::Value;

/// Validates every argument of the invocation (including the implicit
/// receiver of instance methods). Returns `None` when everything passes.
pub fn validate_static_command_arguments(
    registry: &TypeRegistry,
    method: &MethodDescriptor,
    arguments: &[Value],
) -> Option<StaticCommandModelState> {
    let mut state = StaticCommandModelState::new();

    let mut index = 0;
    if !method.is_static {
        if let Some(receiver) = arguments.first() {
            validate_value(registry, method.declaring_type, receiver, "", "this", &mut state);
        }
        index = 1;
    }
    for parameter in &method.parameters {
        if parameter.inject {
            index += 1;
            continue;
        }
        if let Some(value) = arguments.get(index) {
            validate_value(registry, parameter.parameter_type, value, "", &parameter.name, &mut state);
        }
        index += 1;
    }

    if state.is_valid() { None } else { Some(state) }
}

fn validate_value(
    registry: &TypeRegistry,
    ty: TypeId,
    value: &Value,
    path: &str,
    argument_name: &str,
    state: &mut StaticCommandModelState,
) {
    match registry.get(registry.unwrap_nullable(ty)).map(|d| d.kind.clone()) {
        Some(TypeKind::Class { .. }) => {
            let Some(descriptor) = registry.get(registry.unwrap_nullable(ty)) else { return };
            let fields = value.as_object();
            for property in &descriptor.properties {
                let field_value =
                    fields.and_then(|o| o.get(&property.name)).cloned().unwrap_or(Value::Null);
                let property_path = join_path(path, &property.name);
                for rule in &property.validation_rules {
                    if let Some(message) = check_rule(rule, &field_value) {
                        state.add_property_error(argument_name, &property_path, message);
                    }
                }
                // There is nothing to descend into below a null value.
                if !field_value.is_null() {
                    validate_value(
                        registry,
                        property.property_type,
                        &field_value,
                        &property_path,
                        argument_name,
                        state,
                    );
                }
            }
        }
        Some(TypeKind::Array(element)) => {
            if let Value::Array(items) = value {
                for (i, item) in items.iter().enumerate() {
                    let item_path = join_path(path, &i.to_string());
                    validate_value(registry, element, item, &item_path, argument_name, state);
                }
            }
        }
        _ => {}
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() { segment.to_string() } else { format!("{prefix}/{segment}") }
}
