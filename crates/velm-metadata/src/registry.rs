//! The control metadata registry.
//!
//! Each control type carries a property-initializer hook (the explicit
//! replacement for "run the static constructor on first touch"). The
//! registry runs every hook exactly once per process: `init_type` is
//! idempotent through a concurrent set, initializes base types first, and
//! `ensure_initialized` distributes the per-assembly pass across the rayon
//! pool under a double-checked one-shot flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use velm_common::types::{TypeId, TypeKind, TypeRegistry};

use crate::config::MarkupConfiguration;
use crate::control_type::{
    ControlResolverMetadata, ControlType, GroupedPropertyDescriptor, PropertyGroupDescriptor,
};

#[derive(Debug, Error)]
pub enum MetadataError {
    /// Fatal at startup; the configuration references something that does
    /// not exist.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// Fatal for the markup file being compiled.
    #[error("compilation error: {message}")]
    Compilation { message: String },
    #[error("{message}")]
    UnsupportedOperation { message: String },
    #[error("could not compile markup control '{file}': {message}")]
    MarkupCompilation { file: String, message: String },
}

/// Tag names a control declares for markup.
#[derive(Clone, Debug, Default)]
pub struct ControlMarkupOptions {
    pub primary_name: Option<String>,
    pub alternative_names: Vec<String>,
}

type InitHook = Arc<dyn Fn(&TypeRegistry) + Send + Sync>;

/// Declarative registration of one control-bearing type.
#[derive(Clone)]
pub struct ControlRegistration {
    pub type_id: TypeId,
    /// Runs once, registering the control's bindable properties.
    pub property_initializer: Option<InitHook>,
    /// Runs once for concrete composite controls, registering the properties
    /// derived from the composite builder signature.
    pub composite_initializer: Option<InitHook>,
    pub markup_options: ControlMarkupOptions,
}

impl ControlRegistration {
    pub fn new(type_id: TypeId) -> Self {
        ControlRegistration {
            type_id,
            property_initializer: None,
            composite_initializer: None,
            markup_options: ControlMarkupOptions::default(),
        }
    }

    pub fn with_initializer(mut self, hook: impl Fn(&TypeRegistry) + Send + Sync + 'static) -> Self {
        self.property_initializer = Some(Arc::new(hook));
        self
    }

    pub fn with_composite_initializer(
        mut self,
        hook: impl Fn(&TypeRegistry) + Send + Sync + 'static,
    ) -> Self {
        self.composite_initializer = Some(Arc::new(hook));
        self
    }

    pub fn with_markup_options(mut self, options: ControlMarkupOptions) -> Self {
        self.markup_options = options;
        self
    }
}

pub struct ControlMetadataRegistry {
    types: Arc<TypeRegistry>,
    /// The root bindable-control type; alias maps enumerate types assignable
    /// to it.
    base_control: TypeId,
    control_info: DashMap<TypeId, ControlRegistration>,
    assemblies: RwLock<FxHashMap<String, Vec<TypeId>>>,
    /// Capability interface -> capability type carrying the property bundle.
    capability_interfaces: DashMap<TypeId, TypeId>,
    /// Control type -> capability types registered on it.
    capabilities: DashMap<TypeId, Vec<TypeId>>,
    property_groups: DashMap<TypeId, Vec<PropertyGroupDescriptor>>,
    /// Property aliases resolved after all properties are registered.
    property_aliases: Mutex<Vec<(TypeId, String, String)>>,
    init_set: DashSet<TypeId>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl ControlMetadataRegistry {
    pub fn new(types: Arc<TypeRegistry>, base_control: TypeId) -> Self {
        ControlMetadataRegistry {
            types,
            base_control,
            control_info: DashMap::new(),
            assemblies: RwLock::new(FxHashMap::default()),
            capability_interfaces: DashMap::new(),
            capabilities: DashMap::new(),
            property_groups: DashMap::new(),
            property_aliases: Mutex::new(Vec::new()),
            init_set: DashSet::new(),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn base_control(&self) -> TypeId {
        self.base_control
    }

    pub fn register_assembly(&self, name: impl Into<String>, types: Vec<TypeId>) {
        let mut assemblies = self.assemblies.write().unwrap_or_else(|e| e.into_inner());
        assemblies.entry(name.into()).or_default().extend(types);
    }

    pub fn register_control(&self, registration: ControlRegistration) {
        self.control_info.insert(registration.type_id, registration);
    }

    pub fn register_capability_interface(&self, interface: TypeId, capability_type: TypeId) {
        self.capability_interfaces.insert(interface, capability_type);
    }

    pub fn register_property_group(&self, control: TypeId, group: PropertyGroupDescriptor) {
        self.property_groups.entry(control).or_default().push(group);
    }

    pub fn register_property_alias(
        &self,
        control: TypeId,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) {
        self.property_aliases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((control, alias.into(), target.into()));
    }

    /// Ensures the type is initialized: runs its property hooks and
    /// registers capabilities and composite properties, base type first.
    /// Idempotent and safe to race; the hooks themselves run at most once.
    pub fn init_type(&self, type_id: TypeId) {
        // Not control-bearing, nothing to touch.
        let Some(registration) = self.control_info.get(&type_id).map(|r| r.clone()) else {
            return;
        };
        // Avoid mapping the type twice. Every action below is idempotent, so
        // a lost race only wastes work; the set is inserted last.
        if self.init_set.contains(&type_id) {
            return;
        }

        if let Some(TypeKind::Class { base: Some(base), .. }) =
            self.types.get(type_id).map(|d| d.kind.clone())
        {
            self.init_type(base);
        }

        if let Some(hook) = &registration.property_initializer {
            hook(&self.types);
        }

        self.register_composite_control_properties(&registration);
        self.register_capabilities_from_interfaces(type_id);

        self.init_set.insert(type_id);
    }

    fn register_composite_control_properties(&self, registration: &ControlRegistration) {
        let is_abstract = matches!(
            self.types.get(registration.type_id).map(|d| d.kind.clone()),
            Some(TypeKind::Class { is_abstract: true, .. })
        );
        if is_abstract {
            return;
        }
        if let Some(hook) = &registration.composite_initializer {
            hook(&self.types);
        }
    }

    fn register_capabilities_from_interfaces(&self, type_id: TypeId) {
        let Some(TypeKind::Class { interfaces, .. }) =
            self.types.get(type_id).map(|d| d.kind.clone())
        else {
            return;
        };
        for interface in interfaces {
            let Some(capability_type) = self.capability_interfaces.get(&interface).map(|e| *e) else {
                continue;
            };
            let mut registered = self.capabilities.entry(type_id).or_default();
            if registered.contains(&capability_type) {
                continue;
            }
            // The capability contributes its property bundle to the control.
            if let Some(capability) = self.types.get(capability_type) {
                for property in &capability.properties {
                    let _ = self.types.add_property(type_id, property.clone());
                }
            }
            registered.push(capability_type);
        }
    }

    /// Process-wide one-shot initialization of every registered assembly.
    /// Late callers short-circuit on the flag; the slow path runs under the
    /// lock and distributes per-assembly work across the rayon pool.
    pub fn ensure_initialized(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.initialized.load(Ordering::Acquire) {
            return;
        }

        let assemblies: Vec<Vec<TypeId>> = {
            let map = self.assemblies.read().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        assemblies.par_iter().for_each(|types| {
            for &type_id in types {
                self.init_type(type_id);
            }
        });

        self.resolve_all_property_aliases();
        self.initialized.store(true, Ordering::Release);
        debug!("control metadata initialization finished");
    }

    /// After all properties are registered, aliases can be resolved to their
    /// targets.
    fn resolve_all_property_aliases(&self) {
        let aliases = self.property_aliases.lock().unwrap_or_else(|e| e.into_inner());
        for (control, alias, target) in aliases.iter() {
            let Some(descriptor) = self.types.get(*control) else { continue };
            if let Some(property) = descriptor.property(target) {
                let mut aliased = property.clone();
                aliased.name = alias.clone();
                let _ = self.types.add_property(*control, aliased);
            }
        }
    }

    /// Builds the case-insensitive `prefix:tagName -> control type` map from
    /// code-only control rules.
    pub fn build_control_aliases_map(
        &self,
        markup: &MarkupConfiguration,
    ) -> Result<FxHashMap<String, TypeId>, MetadataError> {
        let mut mappings: FxHashMap<String, TypeId> = FxHashMap::default();

        for rule in &markup.controls {
            if rule.tag_name.is_some() {
                // markup controls are not supported here
                continue;
            }
            let assembly_name = rule.assembly.clone().unwrap_or_default();
            let assembly_types = {
                let assemblies = self.assemblies.read().unwrap_or_else(|e| e.into_inner());
                assemblies.get(&assembly_name).cloned()
            };
            let Some(assembly_types) = assembly_types else {
                return Err(MetadataError::Configuration {
                    message: format!("The assembly {assembly_name} was not found!"),
                });
            };

            for type_id in assembly_types {
                if !self.is_public_concrete_control(type_id) {
                    continue;
                }
                let Some(options) =
                    self.control_info.get(&type_id).map(|r| r.markup_options.clone())
                else {
                    continue;
                };
                if let Some(primary) = &options.primary_name {
                    mappings
                        .insert(format!("{}:{}", rule.tag_prefix, primary).to_lowercase(), type_id);
                }
                for alternative in &options.alternative_names {
                    let key = format!("{}:{}", rule.tag_prefix, alternative).to_lowercase();
                    if mappings.contains_key(&key) {
                        return Err(MetadataError::Compilation {
                            message: format!(
                                "A conflicting primary name or alternative name {alternative} found at control {}.",
                                self.types.name_of(type_id)
                            ),
                        });
                    }
                    mappings.insert(key, type_id);
                }
            }
        }
        Ok(mappings)
    }

    pub(crate) fn is_public_concrete_control(&self, type_id: TypeId) -> bool {
        match self.types.get(type_id).map(|d| d.kind.clone()) {
            Some(TypeKind::Class { is_abstract, is_public, .. }) => {
                !is_abstract
                    && is_public
                    && (type_id == self.base_control
                        || self.types.is_assignable_from(self.base_control, type_id))
            }
            _ => false,
        }
    }

    /// Collects the resolver metadata of one control: properties including
    /// inherited ones, property groups and capabilities.
    pub fn build_control_metadata(&self, control_type: &ControlType) -> ControlResolverMetadata {
        self.init_type(control_type.type_id);

        let mut properties = Vec::new();
        let mut groups = Vec::new();
        let mut current = Some(control_type.type_id);
        while let Some(type_id) = current {
            if let Some(descriptor) = self.types.get(type_id) {
                for property in &descriptor.properties {
                    if !properties.iter().any(|p: &velm_common::types::PropertyDescriptor| {
                        p.name == property.name
                    }) {
                        properties.push(property.clone());
                    }
                }
                if let Some(declared) = self.property_groups.get(&type_id) {
                    for group in declared.iter() {
                        if !groups.iter().any(|g: &PropertyGroupDescriptor| g.prefix == group.prefix)
                        {
                            groups.push(group.clone());
                        }
                    }
                }
                current = match descriptor.kind {
                    TypeKind::Class { base, .. } => base,
                    _ => None,
                };
            } else {
                current = None;
            }
        }

        ControlResolverMetadata {
            control_type: control_type.clone(),
            name: self.types.name_of(control_type.type_id),
            properties,
            property_groups: groups,
            capabilities: self
                .capabilities
                .get(&control_type.type_id)
                .map(|c| c.clone())
                .unwrap_or_default(),
        }
    }

    /// Resolves a member of a dynamic property family. The empty prefix is
    /// the plain HTML attribute group.
    pub fn get_property_group_member(
        &self,
        metadata: &ControlResolverMetadata,
        prefix: &str,
        name: &str,
    ) -> Result<GroupedPropertyDescriptor, MetadataError> {
        let Some(group) = metadata.property_groups.iter().find(|g| g.prefix == prefix) else {
            return Err(MetadataError::UnsupportedOperation {
                message: format!(
                    "Control {} does not support property group with prefix '{prefix}'.",
                    metadata.name
                ),
            });
        };
        Ok(GroupedPropertyDescriptor {
            group_name: group.name.clone(),
            member_name: name.to_string(),
            value_type: group.value_type,
        })
    }

    pub fn assembly_types(&self, name: &str) -> Option<Vec<TypeId>> {
        let assemblies = self.assemblies.read().unwrap_or_else(|e| e.into_inner());
        assemblies.get(name).cloned()
    }
}
