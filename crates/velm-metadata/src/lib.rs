//! Control metadata registry and control tree resolution.
//!
//! Controls, their bindable properties, property groups and capabilities are
//! registered declaratively (there is no runtime reflection to discover
//! them). The registry guarantees each control type is initialized exactly
//! once per process, base types first, no matter how many threads race into
//! it; the resolver maps markup tags onto registered control types.

pub mod config;
pub use config::{ControlRuleConfig, MarkupConfiguration};

pub mod control_type;
pub use control_type::{ControlResolverMetadata, ControlType, GroupedPropertyDescriptor, PropertyGroupDescriptor};

pub mod registry;
pub use registry::{
    ControlMarkupOptions, ControlMetadataRegistry, ControlRegistration, MetadataError,
};

pub mod resolver;
pub use resolver::{ControlResolver, MarkupControlCompiler, RegisteredMarkupCompiler};
