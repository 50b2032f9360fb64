//! Control type handles and resolved metadata.

use velm_common::types::{PropertyDescriptor, TypeId};

/// A resolved control: the registered type plus, for markup controls, the
/// source file and the data context type the control switches to.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlType {
    pub type_id: TypeId,
    pub virtual_path: Option<String>,
    pub data_context_type: Option<TypeId>,
}

impl ControlType {
    pub fn new(type_id: TypeId) -> Self {
        ControlType { type_id, virtual_path: None, data_context_type: None }
    }

    pub fn markup(type_id: TypeId, virtual_path: impl Into<String>, data_context_type: Option<TypeId>) -> Self {
        ControlType { type_id, virtual_path: Some(virtual_path.into()), data_context_type }
    }
}

/// A family of dynamically named properties sharing a prefix. The empty
/// prefix is the plain HTML attribute group.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyGroupDescriptor {
    pub name: String,
    pub prefix: String,
    pub value_type: TypeId,
}

/// A member resolved inside a property group, e.g. `class` within the HTML
/// attribute group.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedPropertyDescriptor {
    pub group_name: String,
    pub member_name: String,
    pub value_type: TypeId,
}

/// Everything the markup compiler needs to know about one control class.
#[derive(Clone, Debug)]
pub struct ControlResolverMetadata {
    pub control_type: ControlType,
    pub name: String,
    /// Bindable properties including inherited and capability-contributed
    /// ones.
    pub properties: Vec<PropertyDescriptor>,
    pub property_groups: Vec<PropertyGroupDescriptor>,
    /// Capability types registered on the control.
    pub capabilities: Vec<TypeId>,
}

impl ControlResolverMetadata {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }
}
