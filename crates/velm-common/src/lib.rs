//! Common types and utilities for the velm MVVM framework.
//!
//! This crate provides foundational types used across all velm crates:
//! - Runtime values (`Value`, `ObjectValue`, `ServiceRef`)
//! - The type/member registry (`TypeRegistry`, `TypeDescriptor`, `MethodDescriptor`)
//! - Value conversion (`convert_value`)
//! - View-model serialization maps (`PropertyMap`, `SerializationMapper`)
//! - Validation rules and static-command model state
//! - Request-scoped service resolution (`ServiceProvider`)

use std::future::Future;
use std::pin::Pin;

// Runtime value model
pub mod value;
pub use value::{ObjectValue, ServiceRef, Value, ValueError};

// Type and member registry
pub mod types;
pub use types::{
    MemberRef, MethodBody, MethodDescriptor, MethodError, MethodRegistration, ParameterDescriptor,
    PropertyDescriptor, StaticCommandValidation, TypeDescriptor, TypeError, TypeId, TypeKind,
    TypeRegistry, WellKnownTypes,
};

// Value conversion
pub mod convert;
pub use convert::{TypeConvertError, conforms, convert_value};

// View-model serialization contracts
pub mod serialization;
pub use serialization::{
    Direction, PropertyMap, ProtectMode, SerializationError, SerializationMapper,
    ViewModelSerializationMap,
};

// Validation rules and static-command model state
pub mod validation;
pub use validation::{
    ClientValidationRule, InvalidModelStateError, StaticCommandModelState, ValidationError,
    ValidationRule,
};

// Request-scoped services
pub mod services;
pub use services::ServiceProvider;

/// Boxed future used wherever the framework recurses asynchronously.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
