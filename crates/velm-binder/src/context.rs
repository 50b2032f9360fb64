//! The data context stack.
//!
//! An immutable, `Arc`-linked chain of frames. Each frame names the
//! view-model type visible as `_this` at one markup scope, plus the
//! extension parameters and namespace imports introduced there. Children see
//! ancestor extension parameters unless shadowed by the same name.

use std::sync::Arc;

use velm_common::types::TypeId;

/// A named parameter injected into the binding scope (collection index,
/// page info, injected services and the like).
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionParameter {
    pub name: String,
    pub parameter_type: TypeId,
    /// Visible in descendant frames too. Parameters with `inherit = false`
    /// are only in scope at the frame that declared them.
    pub inherit: bool,
    /// The client-side expression this parameter translates to.
    pub client_expression: String,
}

impl ExtensionParameter {
    pub fn new(
        name: impl Into<String>,
        parameter_type: TypeId,
        client_expression: impl Into<String>,
    ) -> Self {
        ExtensionParameter {
            name: name.into(),
            parameter_type,
            inherit: true,
            client_expression: client_expression.into(),
        }
    }

    pub fn non_inherited(mut self) -> Self {
        self.inherit = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceImport {
    pub namespace: String,
    pub alias: Option<String>,
}

impl NamespaceImport {
    pub fn new(namespace: impl Into<String>) -> Self {
        NamespaceImport { namespace: namespace.into(), alias: None }
    }
}

#[derive(Debug)]
struct Frame {
    data_context_type: TypeId,
    parent: Option<DataContextStack>,
    extension_parameters: Vec<ExtensionParameter>,
    namespace_imports: Vec<NamespaceImport>,
}

/// One scope in the hierarchy of data contexts. Cheap to clone; frames are
/// shared, never mutated.
#[derive(Clone, Debug)]
pub struct DataContextStack {
    frame: Arc<Frame>,
}

impl DataContextStack {
    pub fn create(
        data_context_type: TypeId,
        parent: Option<&DataContextStack>,
        extension_parameters: Vec<ExtensionParameter>,
        namespace_imports: Vec<NamespaceImport>,
    ) -> Self {
        DataContextStack {
            frame: Arc::new(Frame {
                data_context_type,
                parent: parent.cloned(),
                extension_parameters,
                namespace_imports,
            }),
        }
    }

    pub fn data_context_type(&self) -> TypeId {
        self.frame.data_context_type
    }

    pub fn parent(&self) -> Option<&DataContextStack> {
        self.frame.parent.as_ref()
    }

    /// Number of ancestor frames above this one.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(parent) = current {
            depth += 1;
            current = parent.parent();
        }
        depth
    }

    /// Context types from this frame up to the root.
    pub fn enumerable_items(&self) -> Vec<TypeId> {
        let mut items = vec![self.data_context_type()];
        let mut current = self.parent();
        while let Some(parent) = current {
            items.push(parent.data_context_type());
            current = parent.parent();
        }
        items
    }

    /// The context type `levels` frames above this one (0 = this frame).
    pub fn ancestor_type(&self, levels: usize) -> Option<TypeId> {
        let mut current = self;
        for _ in 0..levels {
            current = current.parent()?;
        }
        Some(current.data_context_type())
    }

    /// Resolves an extension parameter, innermost frame first. Returns the
    /// parameter and how many frames up it was found.
    pub fn find_extension_parameter(&self, name: &str) -> Option<(ExtensionParameter, usize)> {
        let mut current = self;
        let mut levels = 0;
        loop {
            if let Some(parameter) = current
                .frame
                .extension_parameters
                .iter()
                .find(|p| p.name == name && (levels == 0 || p.inherit))
            {
                return Some((parameter.clone(), levels));
            }
            match current.parent() {
                Some(parent) => {
                    current = parent;
                    levels += 1;
                }
                None => return None,
            }
        }
    }

    /// Namespace imports of this frame and all ancestors.
    pub fn all_namespace_imports(&self) -> Vec<NamespaceImport> {
        let mut imports = Vec::new();
        let mut current = Some(self);
        while let Some(stack) = current {
            imports.extend(stack.frame.namespace_imports.iter().cloned());
            current = stack.parent();
        }
        imports
    }
}
