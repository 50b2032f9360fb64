//! View-model serialization contracts.
//!
//! A `ViewModelSerializationMap` describes how one view-model type crosses
//! the wire: per property, in which directions it transfers, how it is
//! protected, and which client validation rules apply. The serializer itself
//! is an external collaborator; it only consumes these maps.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TypeError, TypeId, TypeKind, TypeRegistry};
use crate::validation::{ClientValidationRule, translate_validation_rules};

bitflags! {
    /// Transfer-direction override declared on a property.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Direction: u8 {
        const SERVER_TO_CLIENT_FIRST_REQUEST = 1;
        const SERVER_TO_CLIENT_POSTBACK = 2;
        const CLIENT_TO_SERVER_IN_POSTBACK_PATH = 4;
        const CLIENT_TO_SERVER_NOT_IN_POSTBACK_PATH = 8;
    }
}

impl Direction {
    pub const SERVER_TO_CLIENT: Direction = Direction::SERVER_TO_CLIENT_FIRST_REQUEST
        .union(Direction::SERVER_TO_CLIENT_POSTBACK);
    pub const CLIENT_TO_SERVER: Direction = Direction::CLIENT_TO_SERVER_IN_POSTBACK_PATH
        .union(Direction::CLIENT_TO_SERVER_NOT_IN_POSTBACK_PATH);
    pub const BOTH: Direction = Direction::SERVER_TO_CLIENT.union(Direction::CLIENT_TO_SERVER);
}

/// How a property value is protected against client tampering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtectMode {
    #[default]
    None,
    SignData,
    EncryptData,
}

/// One property's serialization contract.
#[derive(Clone, Debug)]
pub struct PropertyMap {
    pub name: String,
    pub property_type: TypeId,
    pub transfer_first_request: bool,
    pub transfer_after_postback: bool,
    pub transfer_to_server: bool,
    pub transfer_to_server_only_in_path: bool,
    pub protection: ProtectMode,
    pub client_extender: Option<String>,
    pub json_converter: Option<String>,
    /// Complex non-enumerable properties are populated in place rather than
    /// replaced wholesale.
    pub populate: bool,
    pub validation_rules: Vec<ClientValidationRule>,
}

#[derive(Clone, Debug)]
pub struct ViewModelSerializationMap {
    pub type_id: TypeId,
    pub properties: Vec<PropertyMap>,
}

impl ViewModelSerializationMap {
    pub fn property(&self, name: &str) -> Option<&PropertyMap> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Builds serialization maps from registered type metadata.
pub struct SerializationMapper<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> SerializationMapper<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        SerializationMapper { registry }
    }

    pub fn create_map(&self, type_id: TypeId) -> Result<ViewModelSerializationMap, SerializationError> {
        let descriptor = self
            .registry
            .get(type_id)
            .ok_or(TypeError::UnknownType { name: format!("#{}", type_id.0) })?;

        let mut source = descriptor.properties.clone();
        source.sort_by(|a, b| a.name.cmp(&b.name));

        let mut properties = Vec::new();
        for property in source {
            if property.json_ignore {
                continue;
            }

            let mut map = PropertyMap {
                name: property.name.clone(),
                property_type: property.property_type,
                transfer_first_request: property.has_public_getter,
                transfer_after_postback: property.has_public_getter,
                transfer_to_server: property.has_public_setter,
                transfer_to_server_only_in_path: false,
                protection: property.protection,
                client_extender: property.client_extender.clone(),
                json_converter: property.json_converter.clone(),
                populate: !self.registry.is_primitive(property.property_type)
                    && !self.registry.is_enumerable(property.property_type)
                    && property.has_public_getter,
                validation_rules: translate_validation_rules(&property),
            };

            if let Some(direction) = property.bind_direction {
                map.transfer_after_postback =
                    direction.contains(Direction::SERVER_TO_CLIENT_POSTBACK);
                map.transfer_first_request =
                    direction.contains(Direction::SERVER_TO_CLIENT_FIRST_REQUEST);
                map.transfer_to_server = direction
                    .intersects(Direction::CLIENT_TO_SERVER);
                map.transfer_to_server_only_in_path = map.transfer_to_server
                    && !direction.contains(Direction::CLIENT_TO_SERVER_NOT_IN_POSTBACK_PATH);
            }

            properties.push(map);
        }

        Ok(ViewModelSerializationMap { type_id, properties })
    }
}

/// Convenience predicate used by the mapper and the binder alike.
pub fn is_complex_type(registry: &TypeRegistry, type_id: TypeId) -> bool {
    !registry.is_primitive(type_id)
        && !matches!(registry.get(type_id).map(|d| d.kind.clone()), Some(TypeKind::Void))
}
