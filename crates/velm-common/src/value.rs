//! Runtime representation of view-model values.
//!
//! Every value that flows through bindings, serialization and static-command
//! invocation is a `Value`. The variants deliberately mirror what JSON can
//! express, plus `Service` for dependency-injected arguments which never
//! cross the wire.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("a service reference cannot be serialized to JSON")]
    ServiceNotSerializable,
}

/// An opaque reference to a request-scoped service instance.
#[derive(Clone)]
pub struct ServiceRef(pub Arc<dyn Any + Send + Sync>);

impl ServiceRef {
    pub fn new<T: Any + Send + Sync>(service: T) -> Self {
        ServiceRef(Arc::new(service))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceRef(..)")
    }
}

impl PartialEq for ServiceRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A structured value with an optional runtime type name.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ObjectValue {
    pub type_name: Option<String>,
    pub fields: IndexMap<String, Value>,
}

impl ObjectValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        ObjectValue { type_name: Some(type_name.into()), fields: IndexMap::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Object(ObjectValue),
    Service(ServiceRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Service(_) => "service",
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut fields = IndexMap::new();
                for (k, v) in map {
                    fields.insert(k.clone(), Value::from_json(v));
                }
                Value::Object(ObjectValue { type_name: None, fields })
            }
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Value::from(*d),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(|i| i.to_json()).collect::<Result<_, _>>()?,
            ),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (k, v) in &o.fields {
                    map.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            Value::Service(_) => return Err(ValueError::ServiceNotSerializable),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => write!(f, "[{} items]", items.len()),
            Value::Object(o) => {
                write!(f, "{{{}}}", o.type_name.as_deref().unwrap_or("object"))
            }
            Value::Service(_) => f.write_str("<service>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"Name":"abc","Count":3,"Ratio":0.5,"Tags":["x"]}"#)
                .expect("valid json");
        let value = Value::from_json(&json);
        let obj = value.as_object().expect("object");
        assert_eq!(obj.get("Name"), Some(&Value::String("abc".into())));
        assert_eq!(obj.get("Count"), Some(&Value::Int(3)));
        assert_eq!(obj.get("Ratio"), Some(&Value::Double(0.5)));
        assert_eq!(value.to_json().expect("serializable"), json);
    }

    #[test]
    fn test_service_is_not_serializable() {
        let value = Value::Service(ServiceRef::new(42_u32));
        assert!(value.to_json().is_err());
    }

    #[test]
    fn test_service_equality_is_identity() {
        let a = ServiceRef::new(1_u8);
        let b = a.clone();
        assert_eq!(Value::Service(a.clone()), Value::Service(b));
        assert_ne!(Value::Service(a), Value::Service(ServiceRef::new(1_u8)));
    }
}
