//! Validation rules and static-command model state.
//!
//! Rules are declared on property descriptors, translated into
//! client-addressable rule records for the serializer, and applied on the
//! server by the static-command argument validator. Validation failures are
//! collected into a `StaticCommandModelState` whose errors must be resolved
//! to concrete property paths before they can be surfaced to the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PropertyDescriptor;
use crate::value::Value;

/// A server-side validation rule declared on a property.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationRule {
    Required,
    Range { min: f64, max: f64 },
    StringLength { min: Option<usize>, max: Option<usize> },
}

/// The client-facing form of a validation rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientValidationRule {
    pub rule_name: String,
    pub error_message: String,
    pub parameters: Vec<serde_json::Value>,
}

/// Translates declared rules into their client representation.
pub fn translate_validation_rules(property: &PropertyDescriptor) -> Vec<ClientValidationRule> {
    property
        .validation_rules
        .iter()
        .map(|rule| match rule {
            ValidationRule::Required => ClientValidationRule {
                rule_name: "required".into(),
                error_message: format!("The {} field is required.", property.name),
                parameters: Vec::new(),
            },
            ValidationRule::Range { min, max } => ClientValidationRule {
                rule_name: "range".into(),
                error_message: format!(
                    "The field {} must be between {min} and {max}.",
                    property.name
                ),
                parameters: vec![serde_json::json!(min), serde_json::json!(max)],
            },
            ValidationRule::StringLength { min, max } => ClientValidationRule {
                rule_name: "stringLength".into(),
                error_message: format!("The field {} has an invalid length.", property.name),
                parameters: vec![serde_json::json!(min), serde_json::json!(max)],
            },
        })
        .collect()
}

/// Checks one value against one rule. `None` means the rule passes.
pub fn check_rule(rule: &ValidationRule, value: &Value) -> Option<String> {
    match rule {
        ValidationRule::Required => match value {
            Value::Null => Some("The field is required.".into()),
            Value::String(s) if s.is_empty() => Some("The field is required.".into()),
            _ => None,
        },
        ValidationRule::Range { min, max } => match value.as_double() {
            Some(n) if n < *min || n > *max => {
                Some(format!("The value must be between {min} and {max}."))
            }
            _ => None,
        },
        ValidationRule::StringLength { min, max } => match value {
            Value::String(s) => {
                let len = s.chars().count();
                if min.is_some_and(|m| len < m) || max.is_some_and(|m| len > m) {
                    Some("The value has an invalid length.".into())
                } else {
                    None
                }
            }
            _ => None,
        },
    }
}

/// A validation error raised during static-command execution.
///
/// `argument_name` is the logical name of the method argument (`"this"` for
/// the implicit receiver); `property_path` starts as the intra-argument path
/// and becomes the full client-addressable path once resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub error_message: String,
    pub argument_name: Option<String>,
    pub property_path: Option<String>,
    pub is_resolved: bool,
}

/// Collected validation errors of one static-command invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticCommandModelState {
    pub errors: Vec<ValidationError>,
}

impl StaticCommandModelState {
    pub fn new() -> Self {
        StaticCommandModelState::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Error on a whole argument.
    pub fn add_argument_error(&mut self, argument_name: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            error_message: message.into(),
            argument_name: Some(argument_name.to_string()),
            property_path: None,
            is_resolved: false,
        });
    }

    /// Error on a property inside an argument.
    pub fn add_property_error(
        &mut self,
        argument_name: &str,
        property_path: &str,
        message: impl Into<String>,
    ) {
        self.errors.push(ValidationError {
            error_message: message.into(),
            argument_name: Some(argument_name.to_string()),
            property_path: Some(property_path.trim_matches('/').to_string()),
            is_resolved: false,
        });
    }

    /// Error with an absolute client path, sidestepping argument mapping.
    pub fn add_raw_error(&mut self, property_path: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            error_message: message.into(),
            argument_name: None,
            property_path: Some(property_path.trim_start_matches('/').to_string()),
            is_resolved: true,
        });
    }
}

/// The "invalid model state" failure raised by validated methods; carries the
/// unresolved errors until the executor maps them to client paths.
#[derive(Debug, Error)]
#[error("the static command arguments failed validation ({} errors)", model_state.errors.len())]
pub struct InvalidModelStateError {
    pub model_state: StaticCommandModelState,
}

impl InvalidModelStateError {
    pub fn new(model_state: StaticCommandModelState) -> Self {
        InvalidModelStateError { model_state }
    }
}
