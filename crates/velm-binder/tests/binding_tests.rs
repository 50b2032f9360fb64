//! Binding resolution, conversions and evaluation against a sample
//! view-model hierarchy.

use std::sync::Arc;

use velm_binder::testing::BindingTestHelper;
use velm_binder::{BindingError, ExtensionParameter, NamespaceImport, TypedExpr};
use velm_common::types::{
    MethodBody, MethodRegistration, ParameterDescriptor, PropertyDescriptor, TypeId, TypeKind,
    TypeRegistry,
};
use velm_common::value::{ObjectValue, Value};

struct Fixture {
    registry: TypeRegistry,
    customer: TypeId,
    order: TypeId,
}

fn class() -> TypeKind {
    TypeKind::Class { base: None, interfaces: Vec::new(), is_abstract: false, is_public: true }
}

fn fixture() -> Fixture {
    let registry = TypeRegistry::new();
    let wk = registry.well_known();

    let order = registry.register("OrderVm", class()).expect("register OrderVm");
    registry.add_property(order, PropertyDescriptor::new("Total", wk.double)).expect("prop");
    registry.add_property(order, PropertyDescriptor::new("Note", wk.string)).expect("prop");

    let customer = registry.register("CustomerVm", class()).expect("register CustomerVm");
    registry.add_property(customer, PropertyDescriptor::new("Name", wk.string)).expect("prop");
    registry.add_property(customer, PropertyDescriptor::new("Age", wk.int)).expect("prop");
    registry
        .add_property(customer, PropertyDescriptor::new("IsActive", wk.boolean))
        .expect("prop");
    let orders_type = registry.array_of(order);
    registry.add_property(customer, PropertyDescriptor::new("Orders", orders_type)).expect("prop");

    registry
        .register_method(
            customer,
            MethodRegistration {
                name: "Greet".into(),
                is_static: false,
                parameters: vec![ParameterDescriptor::new("name", wk.string)],
                return_type: wk.string,
                allow_static_command: None,
                body: MethodBody::Sync(Arc::new(|args| {
                    let name = args.get(1).and_then(|v| v.as_str()).unwrap_or("?");
                    Ok(Value::String(format!("Hello {name}")))
                })),
            },
        )
        .expect("register Greet");

    Fixture { registry, customer, order }
}

fn customer_value() -> Value {
    Value::Object(
        ObjectValue::new("CustomerVm")
            .with_field("Name", Value::String("Ada".into()))
            .with_field("Age", Value::Int(36))
            .with_field("IsActive", Value::Bool(true))
            .with_field(
                "Orders",
                Value::Array(vec![
                    Value::Object(
                        ObjectValue::new("OrderVm")
                            .with_field("Total", Value::Double(12.5))
                            .with_field("Note", Value::String("first".into())),
                    ),
                    Value::Object(
                        ObjectValue::new("OrderVm")
                            .with_field("Total", Value::Double(4.0))
                            .with_field("Note", Value::String("second".into())),
                    ),
                ]),
            ),
    )
}

#[test]
fn test_property_access_binds_against_this() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let bound = helper.parse_binding("Name", &context, None).expect("bind");
    // `Name` is a string member boxed into the expected object type.
    let TypedExpr::Convert { operand, .. } = bound else {
        panic!("expected conversion wrapper, got {bound:?}");
    };
    let TypedExpr::Member { target, name, .. } = *operand else {
        panic!("expected member access");
    };
    assert_eq!(name, "Name");
    assert!(matches!(*target, TypedExpr::ViewModel { ancestor_levels: 0, .. }));
}

#[test]
fn test_parent_and_root_resolution() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer, f.order], Vec::new());

    let customer = customer_value();
    let order = customer.as_object().expect("object").get("Orders").expect("orders").as_array()
        .expect("array")[0]
        .clone();
    let stack = [customer.clone(), order];

    let parent_name =
        helper.execute_binding("_parent.Name", &context, &stack).expect("parent binding");
    assert_eq!(parent_name, Value::String("Ada".into()));

    let root_name = helper.execute_binding("_root.Name", &context, &stack).expect("root binding");
    assert_eq!(root_name, Value::String("Ada".into()));

    let note = helper.execute_binding("Note", &context, &stack).expect("this binding");
    assert_eq!(note, Value::String("first".into()));
}

#[test]
fn test_extension_parameter_wins_over_member() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    // A context-declared `Name` extension parameter shadows the view model
    // property of the same name.
    let context = helper.create_data_context(
        &[f.customer],
        vec![ExtensionParameter::new("Name", wk.int, "$specialName")],
    );

    let bound = helper.parse_binding("Name", &context, Some(wk.int)).expect("bind");
    assert!(matches!(bound, TypedExpr::ExtensionParameter { ref name, .. } if name == "Name"));
}

#[test]
fn test_unresolved_identifier_reports_expression_and_context() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let err = helper.parse_binding("Bogus + 1", &context, None).expect_err("must fail");
    let message = err.to_string();
    assert!(message.contains("Bogus"), "{message}");
    assert!(message.contains("CustomerVm"), "{message}");
    assert!(message.contains("Bogus + 1"), "{message}");
}

#[test]
fn test_no_conversion_path_is_an_error() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let err = helper.parse_binding("Name", &context, Some(wk.boolean)).expect_err("must fail");
    assert!(matches!(err, BindingError::NoConversion { .. }), "{err}");
}

#[test]
fn test_int_widens_to_double() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let bound = helper.parse_binding("Age", &context, Some(wk.double)).expect("bind");
    assert!(matches!(
        bound,
        TypedExpr::Convert { kind: velm_binder::ConversionKind::NumericWiden, .. }
    ));
}

#[test]
fn test_to_string_conversion_is_applied_when_allowed() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let bound = helper.parse_binding("Age", &context, Some(wk.string)).expect("bind");
    assert!(matches!(
        bound,
        TypedExpr::Convert { kind: velm_binder::ConversionKind::ToString, .. }
    ));
}

#[test]
fn test_magic_lambda_conversion_wraps_plain_expression() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let command_type = f.registry.delegate_of(Vec::new(), wk.string);
    let bound = helper.parse_binding("Name", &context, Some(command_type)).expect("bind");
    let TypedExpr::Lambda { parameters, body, .. } = bound else {
        panic!("expected wrapped lambda");
    };
    assert!(parameters.is_empty());
    assert!(matches!(*body, TypedExpr::Member { .. }));
}

#[test]
fn test_explicit_lambda_binds_against_delegate() {
    let f = fixture();
    let wk = f.registry.well_known();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let predicate = f.registry.delegate_of(vec![wk.int], wk.boolean);
    let bound = helper.parse_binding("x => x > 10", &context, Some(predicate)).expect("bind");
    let TypedExpr::Lambda { parameters, .. } = bound else {
        panic!("expected lambda");
    };
    assert_eq!(parameters[0].0, "x");
    assert_eq!(parameters[0].1, wk.int);
}

#[test]
fn test_lambda_without_delegate_context_is_rejected() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let err = helper.parse_binding("x => x", &context, None).expect_err("must fail");
    assert!(matches!(err, BindingError::NotSupported { .. }), "{err}");
}

#[test]
fn test_method_call_binds_and_evaluates() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let result = helper
        .execute_binding("Greet('world')", &context, &[customer_value()])
        .expect("invoke");
    assert_eq!(result, Value::String("Hello world".into()));
}

#[test]
fn test_indexer_and_member_chain_evaluates() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let total = helper
        .execute_binding("Orders[1].Total", &context, &[customer_value()])
        .expect("evaluate");
    assert_eq!(total, Value::Double(4.0));

    let count = helper
        .execute_binding("Orders.Length", &context, &[customer_value()])
        .expect("evaluate");
    assert_eq!(count, Value::Int(2));
}

#[test]
fn test_enum_member_through_namespace_import() {
    let f = fixture();
    f.registry
        .register(
            "Sample.Web.Color",
            TypeKind::Enum {
                members: vec![("Red".into(), 0), ("Green".into(), 1), ("Blue".into(), 2)],
                flags: false,
            },
        )
        .expect("register enum");

    let helper = BindingTestHelper::new(&f.registry)
        .with_imports(vec![NamespaceImport::new("Sample.Web")]);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let bound = helper.parse_binding("Color.Blue", &context, None).expect("bind");
    // Enum members are constants already at bind time; folding collapses the
    // boxing conversion around them.
    assert!(matches!(bound, TypedExpr::Constant { value: Value::Int(2), .. }));
}

#[test]
fn test_conditional_and_logical_evaluation() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let label = helper
        .execute_binding(
            "IsActive && Age >= 18 ? Name + ' (adult)' : Name",
            &context,
            &[customer_value()],
        )
        .expect("evaluate");
    assert_eq!(label, Value::String("Ada (adult)".into()));
}

#[test]
fn test_null_coalesce_evaluation() {
    let f = fixture();
    let helper = BindingTestHelper::new(&f.registry);
    let context = helper.create_data_context(&[f.customer], Vec::new());

    let mut customer = customer_value();
    if let Value::Object(obj) = &mut customer {
        obj.set("Name", Value::Null);
    }
    let fallback = helper
        .execute_binding("Name ?? 'anonymous'", &context, &[customer])
        .expect("evaluate");
    assert_eq!(fallback, Value::String("anonymous".into()));
}
