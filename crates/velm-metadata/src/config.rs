//! Markup configuration data model.
//!
//! Loading this from a file is the hosting layer's job; the framework only
//! consumes the populated structs.

/// One control registration rule: either a code-only rule (assembly +
/// namespace) or a markup-control rule (`src` points at a markup file).
#[derive(Clone, Debug, Default)]
pub struct ControlRuleConfig {
    pub tag_prefix: String,
    pub tag_name: Option<String>,
    pub namespace: Option<String>,
    pub assembly: Option<String>,
    pub src: Option<String>,
}

impl ControlRuleConfig {
    pub fn code_only(
        tag_prefix: impl Into<String>,
        namespace: impl Into<String>,
        assembly: impl Into<String>,
    ) -> Self {
        ControlRuleConfig {
            tag_prefix: tag_prefix.into(),
            tag_name: None,
            namespace: Some(namespace.into()),
            assembly: Some(assembly.into()),
            src: None,
        }
    }

    pub fn markup(
        tag_prefix: impl Into<String>,
        tag_name: impl Into<String>,
        src: impl Into<String>,
    ) -> Self {
        ControlRuleConfig {
            tag_prefix: tag_prefix.into(),
            tag_name: Some(tag_name.into()),
            namespace: None,
            assembly: None,
            src: Some(src.into()),
        }
    }

    pub fn is_markup_rule(&self) -> bool {
        self.src.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MarkupConfiguration {
    pub controls: Vec<ControlRuleConfig>,
    pub imported_namespaces: Vec<String>,
}

impl MarkupConfiguration {
    pub fn new() -> Self {
        MarkupConfiguration::default()
    }

    pub fn add_control(&mut self, rule: ControlRuleConfig) {
        self.controls.push(rule);
    }
}
