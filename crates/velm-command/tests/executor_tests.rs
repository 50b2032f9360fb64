//! Static-command execution: argument consumption order, plan integrity,
//! validation-path resolution and token round-trips.

use std::sync::{Arc, Mutex};

use velm_command::{
    ArgumentCursor, CommandError, KeyedHashProtector, PlanArgument, StaticCommandExecutor,
    StaticCommandInvocationPlan, ValidationPathCursor,
};
use velm_common::services::ServiceProvider;
use velm_common::types::{
    MethodBody, MethodError, MethodRegistration, ParameterDescriptor, PropertyDescriptor,
    StaticCommandValidation, TypeId, TypeRegistry,
};
use velm_common::validation::{StaticCommandModelState, ValidationRule};
use velm_common::value::{ServiceRef, Value};

struct Fixture {
    registry: TypeRegistry,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    delete_id: String,
    find_id: String,
    sum_id: String,
    save_id: String,
    reject_id: String,
    fetch_id: String,
    notify_id: String,
    forbidden_id: String,
    mailer: TypeId,
}

fn class() -> velm_common::types::TypeKind {
    velm_common::types::TypeKind::Class {
        base: None,
        interfaces: Vec::new(),
        is_abstract: false,
        is_public: true,
    }
}

fn fixture() -> Fixture {
    let registry = TypeRegistry::new();
    let wk = registry.well_known();
    let calls: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::new(Mutex::new(Vec::new()));

    let orders = registry.register("OrdersService", class()).expect("register");
    let customer = registry.register("CustomerVm", class()).expect("register");
    let mailer = registry.register("IMailer", velm_common::types::TypeKind::Interface).expect("register");
    registry
        .add_property(
            customer,
            PropertyDescriptor::new("Name", wk.string).with_rule(ValidationRule::Required),
        )
        .expect("prop");

    let record = |calls: &Arc<Mutex<Vec<(String, Vec<Value>)>>>, name: &'static str| {
        let calls = calls.clone();
        move |args: Vec<Value>| {
            calls.lock().expect("lock").push((name.to_string(), args));
            Ok(Value::Null)
        }
    };

    let delete_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "Delete".into(),
                is_static: true,
                parameters: vec![
                    ParameterDescriptor::new("id", wk.int),
                    ParameterDescriptor::new("note", wk.string),
                ],
                return_type: wk.void_type,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Sync(Arc::new(record(&calls, "Delete"))),
            },
        )
        .expect("register Delete");

    let find_calls = calls.clone();
    let find_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "Find".into(),
                is_static: true,
                parameters: vec![ParameterDescriptor::new("id", wk.int)],
                return_type: wk.int,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Sync(Arc::new(move |args: Vec<Value>| {
                    find_calls.lock().expect("lock").push(("Find".into(), args.clone()));
                    let id = args[0].as_int().unwrap_or_default();
                    Ok(Value::Int(id * 10))
                })),
            },
        )
        .expect("register Find");

    let sum_calls = calls.clone();
    let sum_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "Sum".into(),
                is_static: true,
                parameters: vec![
                    ParameterDescriptor::new("a", wk.int),
                    ParameterDescriptor::new("b", wk.int),
                ],
                return_type: wk.int,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Sync(Arc::new(move |args: Vec<Value>| {
                    sum_calls.lock().expect("lock").push(("Sum".into(), args.clone()));
                    let a = args[0].as_int().unwrap_or_default();
                    let b = args[1].as_int().unwrap_or_default();
                    Ok(Value::Int(a + b))
                })),
            },
        )
        .expect("register Sum");

    let save_id = registry
        .register_method(
            customer,
            MethodRegistration {
                name: "Save".into(),
                is_static: false,
                parameters: Vec::new(),
                return_type: wk.void_type,
                allow_static_command: Some(StaticCommandValidation::Automatic),
                body: MethodBody::Sync(Arc::new(record(&calls, "Save"))),
            },
        )
        .expect("register Save");

    let reject_id = registry
        .register_method(
            customer,
            MethodRegistration {
                name: "Reject".into(),
                is_static: false,
                parameters: Vec::new(),
                return_type: wk.void_type,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Sync(Arc::new(|_| {
                    let mut state = StaticCommandModelState::new();
                    state.add_argument_error("this", "rejected by the server");
                    Err(MethodError::ModelState(state))
                })),
            },
        )
        .expect("register Reject");

    let fetch_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "FetchTotal".into(),
                is_static: true,
                parameters: vec![ParameterDescriptor::new("id", wk.int)],
                return_type: wk.double,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Async(Arc::new(|args: Vec<Value>| {
                    Box::pin(async move {
                        let id = args[0].as_int().unwrap_or_default();
                        Ok(Value::Double(id as f64 * 1.5))
                    })
                })),
            },
        )
        .expect("register FetchTotal");

    let notify_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "Notify".into(),
                is_static: true,
                parameters: vec![
                    ParameterDescriptor::new("mailer", mailer).injected(),
                    ParameterDescriptor::new("message", wk.string),
                ],
                return_type: wk.void_type,
                allow_static_command: Some(StaticCommandValidation::None),
                body: MethodBody::Sync(Arc::new(record(&calls, "Notify"))),
            },
        )
        .expect("register Notify");

    let forbidden_id = registry
        .register_method(
            orders,
            MethodRegistration {
                name: "Internal".into(),
                is_static: true,
                parameters: Vec::new(),
                return_type: wk.void_type,
                allow_static_command: None,
                body: MethodBody::Sync(Arc::new(|_| Ok(Value::Null))),
            },
        )
        .expect("register Internal");

    Fixture {
        registry,
        calls,
        delete_id,
        find_id,
        sum_id,
        save_id,
        reject_id,
        fetch_id,
        notify_id,
        forbidden_id,
        mailer,
    }
}

fn executor(f: &Fixture) -> StaticCommandExecutor<'_> {
    StaticCommandExecutor::new(&f.registry, Arc::new(KeyedHashProtector::new([3; 32])))
}

fn customer_json() -> serde_json::Value {
    serde_json::json!({ "Name": "Ada" })
}

#[tokio::test]
async fn test_argument_and_constant_invocation() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.delete_id.clone(),
        vec![
            PlanArgument::Argument { static_type: "int".into() },
            PlanArgument::Constant { value: serde_json::json!("x") },
        ],
    );
    let mut arguments = ArgumentCursor::new(vec![serde_json::json!(5)]);
    let mut paths = None;

    executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect("execute");

    let calls = f.calls.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "Delete");
    assert_eq!(calls[0].1, vec![Value::Int(5), Value::String("x".into())]);
    assert_eq!(arguments.consumed(), 1);
}

#[tokio::test]
async fn test_nested_invocations_consume_arguments_left_to_right() {
    let f = fixture();
    // Sum(arg0, Find(arg1)): the nested plan's argument is consumed after
    // the outer one, in plan-declaration order, from one shared cursor.
    let plan = StaticCommandInvocationPlan::new(
        f.sum_id.clone(),
        vec![
            PlanArgument::Argument { static_type: "int".into() },
            PlanArgument::Invocation {
                plan: Box::new(StaticCommandInvocationPlan::new(
                    f.find_id.clone(),
                    vec![PlanArgument::Argument { static_type: "int".into() }],
                )),
            },
        ],
    );
    assert_eq!(plan.client_argument_count(), 2);

    let mut arguments = ArgumentCursor::new(vec![serde_json::json!(1), serde_json::json!(2)]);
    let mut paths = None;

    let result = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect("execute");
    assert_eq!(result, Value::Int(21));
    assert_eq!(arguments.consumed(), 2);
    assert_eq!(arguments.remaining(), 0);

    let calls = f.calls.lock().expect("lock");
    let (_, find_args) = calls.iter().find(|(n, _)| n == "Find").expect("Find ran");
    assert_eq!(find_args, &vec![Value::Int(2)]);
    let (_, sum_args) = calls.iter().find(|(n, _)| n == "Sum").expect("Sum ran");
    assert_eq!(sum_args, &vec![Value::Int(1), Value::Int(20)]);
}

#[tokio::test]
async fn test_deeply_nested_plan_shares_one_cursor() {
    let f = fixture();
    // Find(Find(arg0)) nested twice to observe strict sequential draining.
    let plan = StaticCommandInvocationPlan::new(
        f.find_id.clone(),
        vec![PlanArgument::Invocation {
            plan: Box::new(StaticCommandInvocationPlan::new(
                f.find_id.clone(),
                vec![PlanArgument::Argument { static_type: "int".into() }],
            )),
        }],
    );
    let mut arguments = ArgumentCursor::new(vec![serde_json::json!(7)]);
    let mut paths = None;

    let result = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect("execute");
    assert_eq!(result, Value::Int(700));
    assert_eq!(arguments.consumed(), 1);

    let calls = f.calls.lock().expect("lock");
    let find_args: Vec<_> = calls.iter().filter(|(n, _)| n == "Find").collect();
    assert_eq!(find_args.len(), 2);
    assert_eq!(find_args[0].1, vec![Value::Int(7)]);
    assert_eq!(find_args[1].1, vec![Value::Int(70)]);
}

#[tokio::test]
async fn test_token_round_trip() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.delete_id.clone(),
        vec![
            PlanArgument::Argument { static_type: "int".into() },
            PlanArgument::Constant { value: serde_json::json!("x") },
        ],
    );
    let exec = executor(&f);
    let token = exec.encrypt_plan(&plan);
    let decrypted = exec.decrypt_plan(&token).expect("decrypt");
    assert_eq!(decrypted, plan);
}

#[tokio::test]
async fn test_tampered_token_is_generic_failure() {
    let f = fixture();
    let exec = executor(&f);
    let plan = StaticCommandInvocationPlan::new(f.delete_id.clone(), vec![
        PlanArgument::Constant { value: serde_json::json!(1) },
        PlanArgument::Constant { value: serde_json::json!("x") },
    ]);
    let token = exec.encrypt_plan(&plan);

    let mut bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &token)
        .expect("decode");
    let index = bytes.len() / 2;
    bytes[index] ^= 0xFF;
    let tampered = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);

    let err = exec.decrypt_plan(&tampered).expect_err("tampered");
    assert!(matches!(err, CommandError::InvalidToken), "{err}");
    assert!(exec.decrypt_plan("@@not-base64@@").is_err());
}

#[tokio::test]
async fn test_plan_static_type_mismatch_is_rejected() {
    let f = fixture();
    // The plan claims the first argument is a string; the parameter is int.
    let plan = StaticCommandInvocationPlan::new(
        f.delete_id.clone(),
        vec![
            PlanArgument::Argument { static_type: "string".into() },
            PlanArgument::Constant { value: serde_json::json!("x") },
        ],
    );
    let mut arguments = ArgumentCursor::new(vec![serde_json::json!("5")]);
    let mut paths = None;

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("mismatch");
    assert!(matches!(err, CommandError::ArgumentTypeMismatch { index: 0 }), "{err}");
}

#[tokio::test]
async fn test_automatic_validation_resolves_paths() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.save_id.clone(),
        vec![PlanArgument::Argument { static_type: "CustomerVm".into() }],
    );
    let mut arguments = ArgumentCursor::new(vec![serde_json::json!({ "Name": null })]);
    let mut paths =
        Some(ValidationPathCursor::new(vec![Some("/Customer".into())]));

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("validation must fail");
    let CommandError::InvalidModelState(state) = err else {
        panic!("expected model state, got {err}");
    };
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].is_resolved);
    assert_eq!(state.errors[0].property_path.as_deref(), Some("/Customer/Name"));

    // The method body never ran.
    assert!(f.calls.lock().expect("lock").iter().all(|(n, _)| n != "Save"));
}

#[tokio::test]
async fn test_this_argument_path_resolution() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.reject_id.clone(),
        vec![PlanArgument::Argument { static_type: "CustomerVm".into() }],
    );
    let mut arguments = ArgumentCursor::new(vec![customer_json()]);
    let mut paths = Some(ValidationPathCursor::new(vec![Some("/Items/2".into())]));

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("the method rejects");
    let CommandError::InvalidModelState(state) = err else {
        panic!("expected model state, got {err}");
    };
    assert_eq!(state.errors[0].property_path.as_deref(), Some("/Items/2"));
    assert!(state.errors[0].is_resolved);
}

#[tokio::test]
async fn test_missing_validation_paths_is_fatal() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.reject_id.clone(),
        vec![PlanArgument::Argument { static_type: "CustomerVm".into() }],
    );
    let mut arguments = ArgumentCursor::new(vec![customer_json()]);
    // The client sent no validation paths at all.
    let mut paths = None;

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("must fail fatally");
    assert!(matches!(err, CommandError::ValidationPathsNotProvided), "{err}");
}

#[tokio::test]
async fn test_async_method_is_awaited() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.fetch_id.clone(),
        vec![PlanArgument::Argument { static_type: "int".into() }],
    );
    let mut arguments = ArgumentCursor::new(vec![serde_json::json!(4)]);
    let mut paths = None;

    let result = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect("execute");
    assert_eq!(result, Value::Double(6.0));
}

#[tokio::test]
async fn test_inject_resolves_from_request_scope() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.notify_id.clone(),
        vec![
            PlanArgument::Inject { service_type: "IMailer".into() },
            PlanArgument::Constant { value: serde_json::json!("hello") },
        ],
    );
    let mut services = ServiceProvider::new();
    let mailer = ServiceRef::new(String::from("smtp"));
    services.register(f.mailer, mailer.clone());

    let mut arguments = ArgumentCursor::new(Vec::new());
    let mut paths = None;
    executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &services)
        .await
        .expect("execute");

    let calls = f.calls.lock().expect("lock");
    let (_, args) = calls.iter().find(|(n, _)| n == "Notify").expect("called");
    assert_eq!(args[0], Value::Service(mailer));
    assert_eq!(args[1], Value::String("hello".into()));

    // Without the registration the same plan fails.
    let mut arguments = ArgumentCursor::new(Vec::new());
    let mut paths = None;
    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("no service");
    assert!(matches!(err, CommandError::MissingService { .. }), "{err}");
}

#[tokio::test]
async fn test_method_without_permission_is_rejected() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(f.forbidden_id.clone(), Vec::new());
    let mut arguments = ArgumentCursor::new(Vec::new());
    let mut paths = None;

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("not allowed");
    assert!(matches!(err, CommandError::NotAllowed { .. }), "{err}");
}

#[tokio::test]
async fn test_wrong_argument_count_is_plan_integrity_error() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.delete_id.clone(),
        vec![PlanArgument::Constant { value: serde_json::json!(1) }],
    );
    let mut arguments = ArgumentCursor::new(Vec::new());
    let mut paths = None;

    let err = executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect_err("wrong arity");
    assert!(matches!(err, CommandError::PlanIntegrity { .. }), "{err}");
}

#[tokio::test]
async fn test_receiver_value_is_deserialized_to_declared_type() {
    let f = fixture();
    let plan = StaticCommandInvocationPlan::new(
        f.save_id.clone(),
        vec![PlanArgument::Argument { static_type: "CustomerVm".into() }],
    );
    let mut arguments = ArgumentCursor::new(vec![customer_json()]);
    let mut paths = Some(ValidationPathCursor::new(vec![Some("/Customer".into())]));

    executor(&f)
        .execute(&plan, &mut arguments, &mut paths, &ServiceProvider::new())
        .await
        .expect("valid customer saves fine");

    let calls = f.calls.lock().expect("lock");
    let (_, args) = calls.iter().find(|(n, _)| n == "Save").expect("called");
    let receiver = args[0].as_object().expect("object receiver");
    assert_eq!(receiver.get("Name"), Some(&Value::String("Ada".into())));
}
