//! Control tree resolution.
//!
//! Maps a markup tag (prefix, name, optional namespace/assembly or file
//! path) onto a registered control type: the compiled alias map first, then
//! a qualified-name lookup, with markup-file controls compiled through a
//! collaborator. "Not found" is `None`, never an error; the markup compiler
//! decides how to surface it at the binding site.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use velm_binder::context::DataContextStack;
use velm_common::types::TypeId;

use crate::config::MarkupConfiguration;
use crate::control_type::{ControlResolverMetadata, ControlType};
use crate::registry::{ControlMetadataRegistry, MetadataError};

/// Compiles markup-file (user) controls on demand.
pub trait MarkupControlCompiler: Send + Sync {
    fn compile(&self, file: &str) -> Result<ControlType, MetadataError>;
}

/// A markup compiler backed by an explicit table of compiled markup
/// controls, which is how tests and precompiled deployments provide them.
#[derive(Default)]
pub struct RegisteredMarkupCompiler {
    controls: FxHashMap<String, (TypeId, Option<DataContextStack>)>,
}

impl RegisteredMarkupCompiler {
    pub fn new() -> Self {
        RegisteredMarkupCompiler::default()
    }

    pub fn register(
        &mut self,
        file: impl Into<String>,
        control: TypeId,
        data_context: Option<DataContextStack>,
    ) {
        self.controls.insert(file.into(), (control, data_context));
    }
}

impl MarkupControlCompiler for RegisteredMarkupCompiler {
    fn compile(&self, file: &str) -> Result<ControlType, MetadataError> {
        match self.controls.get(file) {
            Some((type_id, data_context)) => Ok(ControlType::markup(
                *type_id,
                file,
                data_context.as_ref().map(|c| c.data_context_type()),
            )),
            None => Err(MetadataError::MarkupCompilation {
                file: file.to_string(),
                message: "no markup control is registered for this file".to_string(),
            }),
        }
    }
}

pub struct ControlResolver {
    registry: Arc<ControlMetadataRegistry>,
    markup_compiler: Arc<dyn MarkupControlCompiler>,
    markup_config: MarkupConfiguration,
    control_name_mappings: FxHashMap<String, TypeId>,
}

impl ControlResolver {
    /// Initializes all control metadata (one-shot, process wide) and builds
    /// the alias map. Configuration errors here are fatal at startup.
    pub fn new(
        registry: Arc<ControlMetadataRegistry>,
        markup_compiler: Arc<dyn MarkupControlCompiler>,
        markup_config: MarkupConfiguration,
    ) -> Result<Self, MetadataError> {
        registry.ensure_initialized();
        let control_name_mappings = registry.build_control_aliases_map(&markup_config)?;
        Ok(ControlResolver { registry, markup_compiler, markup_config, control_name_mappings })
    }

    /// Finds the compiled control for a tag: exact alias lookup first, then
    /// a case-insensitive qualified-name lookup within the configured
    /// assembly. `None` means the tag does not resolve to a control.
    pub fn resolve_control(
        &self,
        tag_prefix: &str,
        tag_name: &str,
        namespace: &str,
        assembly: &str,
    ) -> Option<ControlType> {
        let alias = format!("{tag_prefix}:{tag_name}").to_lowercase();
        if let Some(type_id) = self.control_name_mappings.get(&alias) {
            return Some(ControlType::new(*type_id));
        }

        let qualified = format!("{namespace}.{tag_name}");
        let type_id = self.registry.type_registry().find_by_name_ignore_case(&qualified)?;
        let in_assembly =
            self.registry.assembly_types(assembly).is_some_and(|types| types.contains(&type_id));
        if in_assembly { Some(ControlType::new(type_id)) } else { None }
    }

    /// Compiles a markup-file control through the collaborator.
    pub fn resolve_markup_control(&self, file: &str) -> Result<ControlType, MetadataError> {
        self.markup_compiler.compile(file)
    }

    pub fn build_control_metadata(&self, control_type: &ControlType) -> ControlResolverMetadata {
        self.registry.build_control_metadata(control_type)
    }

    /// Lazily enumerates all `(prefix, Option<tag name>, control type)`
    /// registrations for design-time tooling. Markup controls that fail to
    /// resolve are skipped without surfacing why.
    pub fn enumerate_control_types(
        &self,
    ) -> impl Iterator<Item = (String, Option<String>, ControlType)> + '_ {
        let markup_rules = self
            .markup_config
            .controls
            .iter()
            .filter(|rule| rule.is_markup_rule())
            .filter_map(move |rule| {
                let file = rule.src.as_deref().unwrap_or_default();
                match self.markup_compiler.compile(file) {
                    Ok(control) => {
                        Some((rule.tag_prefix.clone(), rule.tag_name.clone(), control))
                    }
                    Err(error) => {
                        // best-effort enumeration, do not crash here
                        debug!(file, %error, "skipping markup control that failed to resolve");
                        None
                    }
                }
            });

        let markup_keys: rustc_hash::FxHashSet<(String, String)> = self
            .markup_config
            .controls
            .iter()
            .filter(|rule| rule.is_markup_rule())
            .map(|rule| (rule.tag_prefix.clone(), rule.tag_name.clone().unwrap_or_default()))
            .collect();

        let code_rules = self
            .markup_config
            .controls
            .iter()
            .filter(|rule| !rule.is_markup_rule() && rule.assembly.is_some())
            .flat_map(move |rule| {
                let types = self
                    .registry
                    .assembly_types(rule.assembly.as_deref().unwrap_or_default())
                    .unwrap_or_default();
                let namespace = rule.namespace.clone().unwrap_or_default();
                let prefix = rule.tag_prefix.clone();
                let markup_keys = markup_keys.clone();
                types.into_iter().filter_map(move |type_id| {
                    if !self.registry.is_public_concrete_control(type_id) {
                        return None;
                    }
                    let name = self.registry.type_registry().name_of(type_id);
                    let (type_namespace, short_name) = match name.rsplit_once('.') {
                        Some((ns, short)) => (ns.to_string(), short.to_string()),
                        None => (String::new(), name.clone()),
                    };
                    if type_namespace != namespace {
                        return None;
                    }
                    // don't report markup controls with a code-behind twice
                    if markup_keys.contains(&(prefix.clone(), short_name)) {
                        return None;
                    }
                    Some((prefix.clone(), None, ControlType::new(type_id)))
                })
            });

        markup_rules.chain(code_rules)
    }
}
