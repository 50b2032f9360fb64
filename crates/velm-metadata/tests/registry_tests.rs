//! Control metadata registry: idempotent initialization, capabilities,
//! alias maps and property groups.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use velm_common::types::{PropertyDescriptor, TypeId, TypeKind, TypeRegistry};
use velm_metadata::{
    ControlMarkupOptions, ControlMetadataRegistry, ControlRegistration, ControlRuleConfig,
    ControlType, MarkupConfiguration, MetadataError, PropertyGroupDescriptor,
};

struct Fixture {
    types: Arc<TypeRegistry>,
    registry: ControlMetadataRegistry,
    base_control: TypeId,
    text_box: TypeId,
}

fn class(base: Option<TypeId>, interfaces: Vec<TypeId>, is_abstract: bool) -> TypeKind {
    TypeKind::Class { base, interfaces, is_abstract, is_public: true }
}

fn fixture() -> Fixture {
    let types = Arc::new(TypeRegistry::new());
    let base_control = types
        .register("Velm.Controls.VelmControl", class(None, Vec::new(), true))
        .expect("register base");
    let text_box = types
        .register("Velm.Controls.TextBox", class(Some(base_control), Vec::new(), false))
        .expect("register TextBox");
    let registry = ControlMetadataRegistry::new(types.clone(), base_control);
    registry.register_assembly("Velm.Controls", vec![base_control, text_box]);
    Fixture { types, registry, base_control, text_box }
}

#[test]
fn test_init_type_runs_property_hook_exactly_once() {
    let f = fixture();
    let wk = f.types.well_known();
    let counter = Arc::new(AtomicUsize::new(0));
    let hook_counter = counter.clone();
    let text_box = f.text_box;

    f.registry.register_control(ControlRegistration::new(text_box).with_initializer(
        move |types| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
            types
                .add_property(text_box, PropertyDescriptor::new("Text", wk.string))
                .expect("add property");
        },
    ));

    f.registry.init_type(f.text_box);
    let after_first: Vec<String> = f
        .types
        .get(f.text_box)
        .expect("descriptor")
        .properties
        .iter()
        .map(|p| p.name.clone())
        .collect();

    f.registry.init_type(f.text_box);
    let after_second: Vec<String> = f
        .types
        .get(f.text_box)
        .expect("descriptor")
        .properties
        .iter()
        .map(|p| p.name.clone())
        .collect();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first, vec!["Text".to_string()]);
}

#[test]
fn test_init_type_initializes_base_type_first() {
    let f = fixture();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let base_order = order.clone();
    f.registry.register_control(ControlRegistration::new(f.base_control).with_initializer(
        move |_| {
            base_order.lock().expect("lock").push("base");
        },
    ));
    let derived_order = order.clone();
    f.registry.register_control(ControlRegistration::new(f.text_box).with_initializer(
        move |_| {
            derived_order.lock().expect("lock").push("derived");
        },
    ));

    f.registry.init_type(f.text_box);
    assert_eq!(*order.lock().expect("lock"), vec!["base", "derived"]);
}

#[test]
fn test_capability_interface_contributes_properties() {
    let types = Arc::new(TypeRegistry::new());
    let wk = types.well_known();
    let base = types
        .register("Velm.Controls.VelmControl", class(None, Vec::new(), true))
        .expect("register");
    let capability_interface =
        types.register("Velm.Controls.ITextCapability", TypeKind::Interface).expect("register");
    let capability = types
        .register("Velm.Controls.TextCapability", class(None, Vec::new(), false))
        .expect("register");
    types.add_property(capability, PropertyDescriptor::new("Text", wk.string)).expect("prop");
    types
        .add_property(capability, PropertyDescriptor::new("Placeholder", wk.string))
        .expect("prop");
    let control = types
        .register(
            "Velm.Controls.SearchBox",
            class(Some(base), vec![capability_interface], false),
        )
        .expect("register");

    let registry = ControlMetadataRegistry::new(types.clone(), base);
    registry.register_capability_interface(capability_interface, capability);
    registry.register_control(ControlRegistration::new(control));

    registry.init_type(control);

    let metadata = registry.build_control_metadata(&ControlType::new(control));
    assert!(metadata.property("Text").is_some());
    assert!(metadata.property("Placeholder").is_some());
    assert_eq!(metadata.capabilities, vec![capability]);

    // Re-initialization does not duplicate the capability.
    registry.init_type(control);
    let metadata = registry.build_control_metadata(&ControlType::new(control));
    assert_eq!(metadata.capabilities, vec![capability]);
}

#[test]
fn test_ensure_initialized_is_one_shot() {
    let f = fixture();
    let counter = Arc::new(AtomicUsize::new(0));
    let hook_counter = counter.clone();
    f.registry.register_control(ControlRegistration::new(f.text_box).with_initializer(
        move |_| {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        },
    ));

    f.registry.ensure_initialized();
    f.registry.ensure_initialized();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_property_alias_resolves_after_initialization() {
    let f = fixture();
    let wk = f.types.well_known();
    let text_box = f.text_box;
    f.registry.register_control(ControlRegistration::new(text_box).with_initializer(
        move |types| {
            types
                .add_property(text_box, PropertyDescriptor::new("Text", wk.string))
                .expect("add property");
        },
    ));
    f.registry.register_property_alias(f.text_box, "Value", "Text");

    f.registry.ensure_initialized();

    let descriptor = f.types.get(f.text_box).expect("descriptor");
    let alias = descriptor.property("Value").expect("alias resolved");
    assert_eq!(alias.property_type, wk.string);
}

#[test]
fn test_alias_map_registers_primary_and_alternative_names() {
    let f = fixture();
    f.registry.register_control(ControlRegistration::new(f.text_box).with_markup_options(
        ControlMarkupOptions {
            primary_name: Some("TextBox".into()),
            alternative_names: vec!["TextInput".into()],
        },
    ));

    let mut markup = MarkupConfiguration::new();
    markup.add_control(ControlRuleConfig::code_only("cc", "Velm.Controls", "Velm.Controls"));

    let mappings = f.registry.build_control_aliases_map(&markup).expect("alias map");
    assert_eq!(mappings.get("cc:textbox"), Some(&f.text_box));
    assert_eq!(mappings.get("cc:textinput"), Some(&f.text_box));
}

#[test]
fn test_alias_map_conflicting_alternative_name_is_compilation_error() {
    let f = fixture();
    let other = f
        .types
        .register("Velm.Controls.FancyBox", class(Some(f.base_control), Vec::new(), false))
        .expect("register");
    f.registry.register_assembly("Velm.Controls", vec![other]);

    f.registry.register_control(ControlRegistration::new(f.text_box).with_markup_options(
        ControlMarkupOptions {
            primary_name: Some("TextBox".into()),
            alternative_names: vec!["Input".into()],
        },
    ));
    f.registry.register_control(ControlRegistration::new(other).with_markup_options(
        ControlMarkupOptions {
            primary_name: Some("FancyBox".into()),
            alternative_names: vec!["Input".into()],
        },
    ));

    let mut markup = MarkupConfiguration::new();
    markup.add_control(ControlRuleConfig::code_only("cc", "Velm.Controls", "Velm.Controls"));

    let err = f.registry.build_control_aliases_map(&markup).expect_err("conflict");
    assert!(matches!(err, MetadataError::Compilation { .. }), "{err}");
    assert!(err.to_string().contains("Input"), "{err}");
}

#[test]
fn test_alias_map_missing_assembly_is_configuration_error() {
    let f = fixture();
    let mut markup = MarkupConfiguration::new();
    markup.add_control(ControlRuleConfig::code_only("cc", "Ghost", "Ghost.Assembly"));

    let err = f.registry.build_control_aliases_map(&markup).expect_err("missing assembly");
    assert!(matches!(err, MetadataError::Configuration { .. }), "{err}");
    assert!(err.to_string().contains("Ghost.Assembly"), "{err}");
}

#[test]
fn test_property_group_member_resolution() {
    let f = fixture();
    let wk = f.types.well_known();
    f.registry.register_control(ControlRegistration::new(f.text_box));
    f.registry.register_property_group(
        f.text_box,
        PropertyGroupDescriptor { name: "HtmlAttributes".into(), prefix: String::new(), value_type: wk.string },
    );
    f.registry.register_property_group(
        f.text_box,
        PropertyGroupDescriptor { name: "Params".into(), prefix: "Param-".into(), value_type: wk.object },
    );

    let metadata = f.registry.build_control_metadata(&ControlType::new(f.text_box));

    let html = f
        .registry
        .get_property_group_member(&metadata, "", "class")
        .expect("html attribute group");
    assert_eq!(html.group_name, "HtmlAttributes");
    assert_eq!(html.member_name, "class");

    let err = f
        .registry
        .get_property_group_member(&metadata, "Data-", "x")
        .expect_err("unknown prefix");
    assert!(matches!(err, MetadataError::UnsupportedOperation { .. }), "{err}");
    assert!(err.to_string().contains("Data-"), "{err}");
}
