//! Control tree resolution: alias lookup, qualified-name fallback and
//! best-effort enumeration.

use std::sync::Arc;

use velm_common::types::{TypeId, TypeKind, TypeRegistry};
use velm_metadata::{
    ControlMarkupOptions, ControlMetadataRegistry, ControlRegistration, ControlResolver,
    ControlRuleConfig, MarkupConfiguration, RegisteredMarkupCompiler,
};

struct Fixture {
    registry: Arc<ControlMetadataRegistry>,
    text_box: TypeId,
    repeater: TypeId,
    markup_compiler: RegisteredMarkupCompiler,
}

fn class(base: Option<TypeId>, is_abstract: bool) -> TypeKind {
    TypeKind::Class { base, interfaces: Vec::new(), is_abstract, is_public: true }
}

fn fixture() -> Fixture {
    let types = Arc::new(TypeRegistry::new());
    let base = types
        .register("Velm.Controls.VelmControl", class(None, true))
        .expect("register base");
    let text_box =
        types.register("Velm.Controls.TextBox", class(Some(base), false)).expect("register");
    let repeater =
        types.register("Velm.Controls.Repeater", class(Some(base), false)).expect("register");
    let user_control =
        types.register("App.Controls.AddressEditor", class(Some(base), false)).expect("register");

    let registry = Arc::new(ControlMetadataRegistry::new(types, base));
    registry.register_assembly("Velm.Controls", vec![base, text_box, repeater]);
    registry.register_control(ControlRegistration::new(text_box).with_markup_options(
        ControlMarkupOptions { primary_name: Some("TextBox".into()), alternative_names: Vec::new() },
    ));
    registry.register_control(ControlRegistration::new(repeater).with_markup_options(
        ControlMarkupOptions { primary_name: Some("Repeater".into()), alternative_names: Vec::new() },
    ));

    let mut markup_compiler = RegisteredMarkupCompiler::new();
    markup_compiler.register("controls/AddressEditor.vm", user_control, None);

    Fixture { registry, text_box, repeater, markup_compiler }
}

fn config() -> MarkupConfiguration {
    let mut markup = MarkupConfiguration::new();
    markup.add_control(ControlRuleConfig::code_only("cc", "Velm.Controls", "Velm.Controls"));
    markup.add_control(ControlRuleConfig::markup("app", "AddressEditor", "controls/AddressEditor.vm"));
    markup.add_control(ControlRuleConfig::markup("app", "Broken", "controls/Broken.vm"));
    markup
}

#[test]
fn test_alias_lookup_is_case_insensitive() {
    let f = fixture();
    let resolver =
        ControlResolver::new(f.registry.clone(), Arc::new(f.markup_compiler), config())
            .expect("resolver");

    let resolved = resolver.resolve_control("CC", "textbox", "", "").expect("resolved");
    assert_eq!(resolved.type_id, f.text_box);
}

#[test]
fn test_qualified_name_fallback() {
    let f = fixture();
    let resolver =
        ControlResolver::new(f.registry.clone(), Arc::new(f.markup_compiler), config())
            .expect("resolver");

    // `Repeater` has no alias for the `x` prefix; the namespace + assembly
    // lookup still finds it.
    let resolved = resolver
        .resolve_control("x", "repeater", "Velm.Controls", "Velm.Controls")
        .expect("resolved");
    assert_eq!(resolved.type_id, f.repeater);
}

#[test]
fn test_unknown_control_is_none_not_error() {
    let f = fixture();
    let resolver =
        ControlResolver::new(f.registry.clone(), Arc::new(f.markup_compiler), config())
            .expect("resolver");

    assert!(resolver.resolve_control("cc", "DoesNotExist", "Velm.Controls", "Velm.Controls").is_none());
    assert!(resolver.resolve_control("cc", "TextBox", "Other.Ns", "Other.Assembly").is_none());
}

#[test]
fn test_markup_control_resolution() {
    let f = fixture();
    let resolver =
        ControlResolver::new(f.registry.clone(), Arc::new(f.markup_compiler), config())
            .expect("resolver");

    let control = resolver.resolve_markup_control("controls/AddressEditor.vm").expect("markup");
    assert_eq!(control.virtual_path.as_deref(), Some("controls/AddressEditor.vm"));
}

#[test]
fn test_enumeration_skips_unresolvable_markup_controls() {
    let f = fixture();
    let resolver =
        ControlResolver::new(f.registry.clone(), Arc::new(f.markup_compiler), config())
            .expect("resolver");

    let all: Vec<_> = resolver.enumerate_control_types().collect();

    // The broken markup control is skipped silently; the registered one and
    // the two code-only controls remain.
    let markup: Vec<_> = all.iter().filter(|(_, tag, _)| tag.is_some()).collect();
    assert_eq!(markup.len(), 1);
    assert_eq!(markup[0].1.as_deref(), Some("AddressEditor"));

    let code: Vec<_> = all.iter().filter(|(_, tag, _)| tag.is_none()).collect();
    assert_eq!(code.len(), 2);
    assert!(code.iter().all(|(prefix, _, _)| prefix == "cc"));

    // Enumeration is restartable.
    assert_eq!(resolver.enumerate_control_types().count(), all.len());
}
