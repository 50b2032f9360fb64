//! The type/member registry.
//!
//! Rust has no runtime reflection, so every view-model type, control type and
//! invocable method is described explicitly and registered up front. The
//! registry is the single source of member metadata for the binder, the
//! serializer and the static-command engine. Method registration validates
//! the stable method identifier and signature once, which is also what makes
//! replaying a plan against a different overload impossible later.

use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use base64::Engine;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::validation::{StaticCommandModelState, ValidationRule};
use crate::value::Value;
use crate::{BoxFuture, serialization::Direction, serialization::ProtectMode};

/// Process-local identity of a registered type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("a type named '{name}' is already registered")]
    DuplicateType { name: String },
    #[error("unknown type '{name}'")]
    UnknownType { name: String },
    #[error("a method with identifier '{id}' is already registered")]
    DuplicateMethod { id: String },
    #[error("unknown method '{id}'")]
    UnknownMethod { id: String },
    #[error("invalid method identifier '{id}': {reason}")]
    InvalidMethodId { id: String, reason: String },
}

/// Error raised from a registered method body.
#[derive(Debug, Error)]
pub enum MethodError {
    /// The method reported validation errors against its arguments. The
    /// engine resolves the paths and returns them to the client.
    #[error("the method reported an invalid model state")]
    ModelState(StaticCommandModelState),
    #[error("{0}")]
    Invocation(String),
}

impl From<crate::validation::InvalidModelStateError> for MethodError {
    fn from(error: crate::validation::InvalidModelStateError) -> Self {
        MethodError::ModelState(error.model_state)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Void,
    /// The top type; anything except void converts to it.
    Object,
    Bool,
    Int,
    Double,
    String,
    Enum { members: Vec<(String, i64)>, flags: bool },
    Class { base: Option<TypeId>, interfaces: Vec<TypeId>, is_abstract: bool, is_public: bool },
    Interface,
    Array(TypeId),
    Nullable(TypeId),
    Delegate { parameters: Vec<TypeId>, return_type: TypeId },
}

#[derive(Clone, Debug)]
pub struct PropertyDescriptor {
    pub name: String,
    pub property_type: TypeId,
    pub has_public_getter: bool,
    pub has_public_setter: bool,
    /// Explicit transfer-direction override (the `Bind` attribute equivalent).
    pub bind_direction: Option<Direction>,
    pub protection: ProtectMode,
    pub client_extender: Option<String>,
    pub json_converter: Option<String>,
    pub json_ignore: bool,
    pub validation_rules: Vec<ValidationRule>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, property_type: TypeId) -> Self {
        PropertyDescriptor {
            name: name.into(),
            property_type,
            has_public_getter: true,
            has_public_setter: true,
            bind_direction: None,
            protection: ProtectMode::None,
            client_extender: None,
            json_converter: None,
            json_ignore: false,
            validation_rules: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.has_public_setter = false;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.bind_direction = Some(direction);
        self
    }

    pub fn with_protection(mut self, protection: ProtectMode) -> Self {
        self.protection = protection;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ParameterDescriptor {
    pub name: String,
    pub parameter_type: TypeId,
    /// Resolved from the request's service scope instead of the client.
    pub inject: bool,
    pub default_value: Option<Value>,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, parameter_type: TypeId) -> Self {
        ParameterDescriptor { name: name.into(), parameter_type, inject: false, default_value: None }
    }

    pub fn injected(mut self) -> Self {
        self.inject = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Validation behavior of a method exposed to static commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum StaticCommandValidation {
    #[default]
    None,
    Automatic,
}

pub type SyncInvoker = Arc<dyn Fn(Vec<Value>) -> Result<Value, MethodError> + Send + Sync>;
pub type AsyncInvoker =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, MethodError>> + Send + Sync>;

#[derive(Clone)]
pub enum MethodBody {
    Sync(SyncInvoker),
    Async(AsyncInvoker),
}

impl std::fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodBody::Sync(_) => f.write_str("MethodBody::Sync(..)"),
            MethodBody::Async(_) => f.write_str("MethodBody::Async(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    /// Stable identifier: `Type.Method(ParamType,...)`.
    pub id: String,
    pub name: String,
    pub declaring_type: TypeId,
    pub is_static: bool,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: TypeId,
    /// `Some` when the method may be invoked through a static command.
    pub allow_static_command: Option<StaticCommandValidation>,
    pub body: MethodBody,
}

/// Input for [`TypeRegistry::register_method`].
pub struct MethodRegistration {
    pub name: String,
    pub is_static: bool,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: TypeId,
    pub allow_static_command: Option<StaticCommandValidation>,
    pub body: MethodBody,
}

#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    pub properties: Vec<PropertyDescriptor>,
    pub methods: Vec<Arc<MethodDescriptor>>,
}

impl TypeDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Clone, Debug)]
pub enum MemberRef {
    Property(PropertyDescriptor),
    Method(Arc<MethodDescriptor>),
}

/// Identities of the primitive types every registry starts with.
#[derive(Copy, Clone, Debug)]
pub struct WellKnownTypes {
    pub void_type: TypeId,
    pub object: TypeId,
    pub boolean: TypeId,
    pub int: TypeId,
    pub double: TypeId,
    pub string: TypeId,
}

pub type TryParseFn = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

pub struct TypeRegistry {
    types: RwLock<Vec<Arc<TypeDescriptor>>>,
    by_name: DashMap<String, TypeId>,
    methods: DashMap<String, Arc<MethodDescriptor>>,
    type_hash_cache: DashMap<TypeId, String>,
    custom_primitives: DashMap<TypeId, TryParseFn>,
    well_known: WellKnownTypes,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let registry = TypeRegistry {
            types: RwLock::new(Vec::new()),
            by_name: DashMap::new(),
            methods: DashMap::new(),
            type_hash_cache: DashMap::new(),
            custom_primitives: DashMap::new(),
            well_known: WellKnownTypes {
                void_type: TypeId(0),
                object: TypeId(1),
                boolean: TypeId(2),
                int: TypeId(3),
                double: TypeId(4),
                string: TypeId(5),
            },
        };
        for (name, kind) in [
            ("void", TypeKind::Void),
            ("object", TypeKind::Object),
            ("bool", TypeKind::Bool),
            ("int", TypeKind::Int),
            ("double", TypeKind::Double),
            ("string", TypeKind::String),
        ] {
            // The registry is empty, names cannot collide yet.
            let _ = registry.register(name, kind);
        }
        registry
    }

    pub fn well_known(&self) -> WellKnownTypes {
        self.well_known
    }

    pub fn register(&self, name: &str, kind: TypeKind) -> Result<TypeId, TypeError> {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        // Checked under the write lock so concurrent registration of the
        // same name cannot slip through.
        if self.by_name.contains_key(name) {
            return Err(TypeError::DuplicateType { name: name.to_string() });
        }
        let id = TypeId(types.len() as u32);
        types.push(Arc::new(TypeDescriptor {
            id,
            name: name.to_string(),
            kind,
            properties: Vec::new(),
            methods: Vec::new(),
        }));
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get(&self, id: TypeId) -> Option<Arc<TypeDescriptor>> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types.get(id.0 as usize).cloned()
    }

    pub fn name_of(&self, id: TypeId) -> String {
        self.get(id).map(|t| t.name.clone()).unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn find_by_name(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).map(|e| *e.value())
    }

    pub fn find_by_name_ignore_case(&self, name: &str) -> Option<TypeId> {
        if let Some(exact) = self.find_by_name(name) {
            return Some(exact);
        }
        self.by_name
            .iter()
            .find(|e| e.key().eq_ignore_ascii_case(name))
            .map(|e| *e.value())
    }

    /// Array of `element`, registered on first use under the name `T[]`.
    pub fn array_of(&self, element: TypeId) -> TypeId {
        let name = format!("{}[]", self.name_of(element));
        self.get_or_register(&name, || TypeKind::Array(element))
    }

    /// Nullable wrapper of `inner`, registered on first use under `T?`.
    pub fn nullable_of(&self, inner: TypeId) -> TypeId {
        let name = format!("{}?", self.name_of(inner));
        self.get_or_register(&name, || TypeKind::Nullable(inner))
    }

    /// Delegate type `Func<P1, .., R>`, registered on first use.
    pub fn delegate_of(&self, parameters: Vec<TypeId>, return_type: TypeId) -> TypeId {
        let mut name = String::from("Func<");
        for p in &parameters {
            let _ = write!(name, "{}, ", self.name_of(*p));
        }
        let _ = write!(name, "{}>", self.name_of(return_type));
        self.get_or_register(&name, || TypeKind::Delegate { parameters, return_type })
    }

    fn get_or_register(&self, name: &str, kind: impl FnOnce() -> TypeKind) -> TypeId {
        if let Some(existing) = self.find_by_name(name) {
            return existing;
        }
        match self.register(name, kind()) {
            Ok(id) => id,
            // Lost a registration race, the name exists now.
            Err(_) => self.find_by_name(name).unwrap_or(self.well_known.object),
        }
    }

    /// Adds or replaces a property by name. Replaying the same registration
    /// leaves the property set unchanged.
    pub fn add_property(&self, type_id: TypeId, property: PropertyDescriptor) -> Result<(), TypeError> {
        self.update(type_id, |desc| {
            if let Some(existing) = desc.properties.iter_mut().find(|p| p.name == property.name) {
                *existing = property;
            } else {
                desc.properties.push(property);
            }
        })
    }

    pub fn register_method(
        &self,
        type_id: TypeId,
        registration: MethodRegistration,
    ) -> Result<String, TypeError> {
        let type_name = self
            .get(type_id)
            .ok_or_else(|| TypeError::UnknownType { name: format!("#{}", type_id.0) })?
            .name
            .clone();
        let mut id = format!("{}.{}(", type_name, registration.name);
        for (i, p) in registration.parameters.iter().enumerate() {
            if i > 0 {
                id.push(',');
            }
            id.push_str(&self.name_of(p.parameter_type));
        }
        id.push(')');
        if registration.name.is_empty() {
            return Err(TypeError::InvalidMethodId { id, reason: "method name is empty".into() });
        }
        if self.methods.contains_key(&id) {
            return Err(TypeError::DuplicateMethod { id });
        }
        let descriptor = Arc::new(MethodDescriptor {
            id: id.clone(),
            name: registration.name,
            declaring_type: type_id,
            is_static: registration.is_static,
            parameters: registration.parameters,
            return_type: registration.return_type,
            allow_static_command: registration.allow_static_command,
            body: registration.body,
        });
        self.methods.insert(id.clone(), descriptor.clone());
        self.update(type_id, |desc| desc.methods.push(descriptor.clone()))?;
        tracing::trace!(method = %id, "registered method");
        Ok(id)
    }

    pub fn find_method(&self, id: &str) -> Option<Arc<MethodDescriptor>> {
        self.methods.get(id).map(|e| e.value().clone())
    }

    /// Resolves a member by name, walking the base-type chain. Properties
    /// shadow methods of the same name, matching binding resolution order.
    pub fn resolve_member(&self, type_id: TypeId, name: &str) -> Option<MemberRef> {
        let mut current = Some(type_id);
        while let Some(id) = current {
            let desc = self.get(id)?;
            if let Some(p) = desc.property(name) {
                return Some(MemberRef::Property(p.clone()));
            }
            if let Some(m) = desc.methods.iter().find(|m| m.name == name) {
                return Some(MemberRef::Method(m.clone()));
            }
            current = match &desc.kind {
                TypeKind::Class { base, .. } => *base,
                _ => None,
            };
        }
        None
    }

    /// All methods named `name` on the type or its base types.
    pub fn find_methods(&self, type_id: TypeId, name: &str) -> Vec<Arc<MethodDescriptor>> {
        let mut result = Vec::new();
        let mut current = Some(type_id);
        while let Some(id) = current {
            let Some(desc) = self.get(id) else { break };
            result.extend(desc.methods.iter().filter(|m| m.name == name).cloned());
            current = match &desc.kind {
                TypeKind::Class { base, .. } => *base,
                _ => None,
            };
        }
        result
    }

    pub fn is_assignable_from(&self, target: TypeId, source: TypeId) -> bool {
        if target == source {
            return true;
        }
        let (Some(target_desc), Some(source_desc)) = (self.get(target), self.get(source)) else {
            return false;
        };
        match &target_desc.kind {
            TypeKind::Object => !matches!(source_desc.kind, TypeKind::Void),
            TypeKind::Nullable(inner) => self.is_assignable_from(*inner, source),
            TypeKind::Interface => self.implements(source, target),
            TypeKind::Class { .. } => {
                let mut current = match &source_desc.kind {
                    TypeKind::Class { base, .. } => *base,
                    _ => None,
                };
                while let Some(base) = current {
                    if base == target {
                        return true;
                    }
                    current = match self.get(base).map(|d| d.kind.clone()) {
                        Some(TypeKind::Class { base, .. }) => base,
                        _ => None,
                    };
                }
                false
            }
            _ => false,
        }
    }

    pub fn implements(&self, type_id: TypeId, interface: TypeId) -> bool {
        let mut current = Some(type_id);
        while let Some(id) = current {
            let Some(desc) = self.get(id) else { return false };
            match &desc.kind {
                TypeKind::Class { base, interfaces, .. } => {
                    if interfaces.contains(&interface) {
                        return true;
                    }
                    current = *base;
                }
                _ => return false,
            }
        }
        false
    }

    pub fn unwrap_nullable(&self, type_id: TypeId) -> TypeId {
        match self.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Nullable(inner)) => inner,
            _ => type_id,
        }
    }

    /// True when the type serializes as a JavaScript primitive.
    pub fn is_primitive(&self, type_id: TypeId) -> bool {
        match self.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Bool | TypeKind::Int | TypeKind::Double | TypeKind::String) => true,
            Some(TypeKind::Enum { .. }) => true,
            Some(TypeKind::Nullable(inner)) => self.is_primitive(inner),
            _ => self.custom_primitives.contains_key(&type_id),
        }
    }

    pub fn is_enumerable(&self, type_id: TypeId) -> bool {
        matches!(self.get(type_id).map(|d| d.kind.clone()), Some(TypeKind::Array(_)))
    }

    /// The equivalent of `default(T)`: null for references and nullables,
    /// zeroed values for the primitives.
    pub fn default_value(&self, type_id: TypeId) -> Value {
        match self.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Bool) => Value::Bool(false),
            Some(TypeKind::Int) => Value::Int(0),
            Some(TypeKind::Double) => Value::Double(0.0),
            Some(TypeKind::Enum { .. }) => Value::Int(0),
            _ => Value::Null,
        }
    }

    pub fn enum_member_value(&self, type_id: TypeId, member: &str) -> Option<i64> {
        match self.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Enum { members, .. }) => members
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(member))
                .map(|(_, v)| *v),
            _ => None,
        }
    }

    /// Renders an enum value back to its member name (or the joined flag
    /// names), falling back to the numeric value.
    pub fn enum_value_to_string(&self, type_id: TypeId, value: i64) -> String {
        match self.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Enum { members, flags }) => {
                if let Some((name, _)) = members.iter().find(|(_, v)| *v == value) {
                    return name.clone();
                }
                if flags {
                    let mut rest = value;
                    let mut parts = Vec::new();
                    for (name, v) in &members {
                        if *v != 0 && rest & v == *v {
                            parts.push(name.clone());
                            rest &= !v;
                        }
                    }
                    if rest == 0 && !parts.is_empty() {
                        return parts.join(", ");
                    }
                }
                value.to_string()
            }
            _ => value.to_string(),
        }
    }

    /// Registers the try-parse hook of a custom primitive type. Insert-if-absent.
    pub fn register_custom_primitive(
        &self,
        type_id: TypeId,
        try_parse: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
    ) {
        self.custom_primitives.entry(type_id).or_insert_with(|| Arc::new(try_parse));
    }

    pub fn custom_primitive_parser(&self, type_id: TypeId) -> Option<TryParseFn> {
        self.custom_primitives.get(&type_id).map(|e| e.value().clone())
    }

    /// Stable short hash of the type identity, memoized.
    pub fn type_hash(&self, type_id: TypeId) -> String {
        if let Some(cached) = self.type_hash_cache.get(&type_id) {
            return cached.clone();
        }
        let digest = Sha256::digest(self.name_of(type_id).as_bytes());
        let hash = base64::engine::general_purpose::STANDARD.encode(&digest[..12]);
        self.type_hash_cache.insert(type_id, hash.clone());
        hash
    }

    /// Drops per-type cache entries; used on hot reload.
    pub fn clear_caches(&self, types: &[TypeId]) {
        for t in types {
            self.type_hash_cache.remove(t);
            self.custom_primitives.remove(t);
        }
    }

    /// `Type.Method(ParamType name, ...) -> Ret` for diagnostics.
    pub fn format_method(&self, method: &MethodDescriptor) -> String {
        let mut out = format!("{}.{}(", self.name_of(method.declaring_type), method.name);
        for (i, p) in method.parameters.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", self.name_of(p.parameter_type), p.name);
        }
        out.push(')');
        if method.return_type != self.well_known.void_type {
            let _ = write!(out, " -> {}", self.name_of(method.return_type));
        }
        out
    }

    fn update(
        &self,
        type_id: TypeId,
        f: impl FnOnce(&mut TypeDescriptor),
    ) -> Result<(), TypeError> {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        let slot = types
            .get_mut(type_id.0 as usize)
            .ok_or_else(|| TypeError::UnknownType { name: format!("#{}", type_id.0) })?;
        let mut copy = (**slot).clone();
        f(&mut copy);
        *slot = Arc::new(copy);
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(base: Option<TypeId>) -> TypeKind {
        TypeKind::Class { base, interfaces: Vec::new(), is_abstract: false, is_public: true }
    }

    #[test]
    fn test_member_resolution_walks_base_chain() {
        let registry = TypeRegistry::new();
        let wk = registry.well_known();
        let base = registry.register("BaseVm", class(None)).expect("register");
        let derived = registry.register("DerivedVm", class(Some(base))).expect("register");
        registry.add_property(base, PropertyDescriptor::new("Name", wk.string)).expect("prop");

        match registry.resolve_member(derived, "Name") {
            Some(MemberRef::Property(p)) => assert_eq!(p.property_type, wk.string),
            other => panic!("unexpected member: {other:?}"),
        }
        assert!(registry.resolve_member(derived, "Missing").is_none());
    }

    #[test]
    fn test_assignability() {
        let registry = TypeRegistry::new();
        let wk = registry.well_known();
        let base = registry.register("Base", class(None)).expect("register");
        let derived = registry.register("Derived", class(Some(base))).expect("register");

        assert!(registry.is_assignable_from(base, derived));
        assert!(!registry.is_assignable_from(derived, base));
        assert!(registry.is_assignable_from(wk.object, derived));
        assert!(!registry.is_assignable_from(wk.object, wk.void_type));
        let nullable_int = registry.nullable_of(wk.int);
        assert!(registry.is_assignable_from(nullable_int, wk.int));
    }

    #[test]
    fn test_method_registration_produces_stable_id() {
        let registry = TypeRegistry::new();
        let wk = registry.well_known();
        let orders = registry.register("Orders", class(None)).expect("register");
        let id = registry
            .register_method(
                orders,
                MethodRegistration {
                    name: "Delete".into(),
                    is_static: true,
                    parameters: vec![ParameterDescriptor::new("id", wk.int)],
                    return_type: wk.void_type,
                    allow_static_command: Some(StaticCommandValidation::None),
                    body: MethodBody::Sync(Arc::new(|_| Ok(Value::Null))),
                },
            )
            .expect("register method");
        assert_eq!(id, "Orders.Delete(int)");
        assert!(registry.find_method(&id).is_some());

        // Same identifier again is a registration-time error.
        let duplicate = registry.register_method(
            orders,
            MethodRegistration {
                name: "Delete".into(),
                is_static: true,
                parameters: vec![ParameterDescriptor::new("id", wk.int)],
                return_type: wk.void_type,
                allow_static_command: None,
                body: MethodBody::Sync(Arc::new(|_| Ok(Value::Null))),
            },
        );
        assert!(matches!(duplicate, Err(TypeError::DuplicateMethod { .. })));
    }

    #[test]
    fn test_type_hash_is_cached_and_invalidatable() {
        let registry = TypeRegistry::new();
        let wk = registry.well_known();
        let h1 = registry.type_hash(wk.string);
        let h2 = registry.type_hash(wk.string);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16); // 12 bytes, base64
        registry.clear_caches(&[wk.string]);
        assert_eq!(registry.type_hash(wk.string), h1);
    }

    #[test]
    fn test_flags_enum_to_string() {
        let registry = TypeRegistry::new();
        let e = registry
            .register(
                "Direction",
                TypeKind::Enum {
                    members: vec![("None".into(), 0), ("Up".into(), 1), ("Down".into(), 2)],
                    flags: true,
                },
            )
            .expect("register");
        assert_eq!(registry.enum_value_to_string(e, 1), "Up");
        assert_eq!(registry.enum_value_to_string(e, 3), "Up, Down");
        assert_eq!(registry.enum_value_to_string(e, 0), "None");
    }
}
