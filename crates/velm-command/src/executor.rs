//! Static-command execution.
//!
//! Per invocation: decrypt, deserialize the plan, deserialize arguments
//! (recursively), validate when the method asks for it, invoke
//! (recursively), and resolve validation-error paths on failure. Client
//! arguments and their validation paths are consumed from cursors shared
//! across the whole recursive call tree, strictly left to right, so nested
//! argument lists interleave in plan-declaration order.

use std::sync::Arc;

use base64::Engine;
use thiserror::Error;
use tracing::debug;

use velm_common::services::ServiceProvider;
use velm_common::types::{
    MethodBody, MethodDescriptor, MethodError, StaticCommandValidation, TypeId, TypeRegistry,
};
use velm_common::validation::StaticCommandModelState;
use velm_common::value::Value;
use velm_common::{BoxFuture, conforms};

use crate::plan::{PlanArgument, StaticCommandInvocationPlan, deserialize_plan};
use crate::protect::ViewModelProtector;
use crate::validator::validate_static_command_arguments;

#[derive(Debug, Error)]
pub enum CommandError {
    /// Decryption or structural deserialization failed. Deliberately does
    /// not say which.
    #[error("the static command token is invalid")]
    InvalidToken,
    /// The plan does not match the registered method; a tampered or stale
    /// client state.
    #[error("invalid invocation plan: {message}")]
    PlanIntegrity { message: String },
    #[error("argument {index} has an invalid type")]
    ArgumentTypeMismatch { index: usize },
    #[error("no service of type {type_name} is registered for this request")]
    MissingService { type_name: String },
    #[error("method {method} is not allowed to be invoked as a static command")]
    NotAllowed { method: String },
    /// Validation failed; every error carries a resolved client path.
    #[error("the static command arguments failed validation")]
    InvalidModelState(StaticCommandModelState),
    /// A validation error occurred but the client sent no validation paths
    /// at all.
    #[error("could not respond with validation failure because the client did not send validation paths")]
    ValidationPathsNotProvided,
    /// A validation error occurred and the client sent no path for the
    /// erroring argument.
    #[error("could not serialize validation error for argument '{argument}', the client did not specify the validation path for this method argument")]
    MissingValidationPath { argument: String },
    #[error("could not map argument name \"{argument}\" to any parameter of {method}")]
    UnmappableArgument { argument: String, method: String },
    /// The bound expression cannot be compiled into a plan.
    #[error("{construct} cannot be used in a static command plan")]
    UnsupportedCommand { construct: String },
    /// The target method failed; propagated unchanged to the hosting layer.
    #[error("{0}")]
    Invocation(String),
}

/// Shared left-to-right cursor over the client-supplied argument values.
pub struct ArgumentCursor {
    values: Vec<serde_json::Value>,
    position: usize,
}

impl ArgumentCursor {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        ArgumentCursor { values, position: 0 }
    }

    /// Builds the cursor from the request's JSON argument array.
    pub fn from_json(arguments: &serde_json::Value) -> Self {
        match arguments {
            serde_json::Value::Array(items) => ArgumentCursor::new(items.clone()),
            _ => ArgumentCursor::new(Vec::new()),
        }
    }

    fn dequeue(&mut self) -> Option<serde_json::Value> {
        let value = self.values.get(self.position).cloned();
        if value.is_some() {
            self.position += 1;
        }
        value
    }

    pub fn consumed(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.position
    }
}

/// Shared cursor over the per-argument validation paths, parallel to the
/// `Argument` slots of the plan.
pub struct ValidationPathCursor {
    paths: Vec<Option<String>>,
    position: usize,
}

impl ValidationPathCursor {
    pub fn new(paths: Vec<Option<String>>) -> Self {
        ValidationPathCursor { paths, position: 0 }
    }

    fn dequeue(&mut self) -> Option<String> {
        let path = self.paths.get(self.position).cloned().flatten();
        self.position += 1;
        path
    }
}

pub struct StaticCommandExecutor<'a> {
    registry: &'a TypeRegistry,
    protector: Arc<dyn ViewModelProtector>,
}

const PROTECTION_PURPOSE: &[&str] = &["velm.staticCommand"];

impl<'a> StaticCommandExecutor<'a> {
    pub fn new(registry: &'a TypeRegistry, protector: Arc<dyn ViewModelProtector>) -> Self {
        StaticCommandExecutor { registry, protector }
    }

    /// Encrypts a plan into the opaque client token.
    pub fn encrypt_plan(&self, plan: &StaticCommandInvocationPlan) -> String {
        let bytes = crate::plan::serialize_plan(plan);
        let protected = self.protector.protect(&bytes, PROTECTION_PURPOSE);
        base64::engine::general_purpose::STANDARD.encode(protected)
    }

    /// Decrypts and deserializes a client token. All failures collapse into
    /// `InvalidToken`; "bad key" and "bad format" are indistinguishable.
    pub fn decrypt_plan(&self, token: &str) -> Result<StaticCommandInvocationPlan, CommandError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(token)
            .map_err(|_| CommandError::InvalidToken)?;
        let plaintext = self
            .protector
            .unprotect(&decoded, PROTECTION_PURPOSE)
            .map_err(|_| CommandError::InvalidToken)?;
        deserialize_plan(&plaintext).map_err(|e| {
            debug!(error = %e, "static command plan failed to deserialize");
            CommandError::InvalidToken
        })
    }

    /// Recursively executes a plan. `arguments` and `validation_paths` are
    /// consumed strictly left to right across the whole plan tree.
    pub fn execute<'exec>(
        &'exec self,
        plan: &'exec StaticCommandInvocationPlan,
        arguments: &'exec mut ArgumentCursor,
        validation_paths: &'exec mut Option<ValidationPathCursor>,
        services: &'exec ServiceProvider,
    ) -> BoxFuture<'exec, Result<Value, CommandError>> {
        Box::pin(self.execute_inner(plan, arguments, validation_paths, services))
    }

    async fn execute_inner(
        &self,
        plan: &StaticCommandInvocationPlan,
        arguments: &mut ArgumentCursor,
        validation_paths: &mut Option<ValidationPathCursor>,
        services: &ServiceProvider,
    ) -> Result<Value, CommandError> {
        let method = self.registry.find_method(&plan.method).ok_or_else(|| {
            CommandError::PlanIntegrity { message: format!("unknown method '{}'", plan.method) }
        })?;

        let expected = method.parameters.len() + usize::from(!method.is_static);
        if plan.arguments.len() != expected {
            return Err(CommandError::PlanIntegrity {
                message: format!(
                    "the plan supplies {} arguments but {} expects {expected}",
                    plan.arguments.len(),
                    plan.method
                ),
            });
        }

        let mut method_args: Vec<Value> = Vec::with_capacity(plan.arguments.len());
        let mut method_arg_paths: Option<Vec<Option<String>>> =
            validation_paths.as_ref().map(|_| Vec::with_capacity(plan.arguments.len()));

        for (index, argument) in plan.arguments.iter().enumerate() {
            let declared = self.parameter_type_at(&method, index);
            let (value, path) = match argument {
                PlanArgument::Argument { static_type } => {
                    let static_type_id =
                        self.registry.find_by_name(static_type).ok_or_else(|| {
                            CommandError::PlanIntegrity {
                                message: format!("unknown argument type '{static_type}'"),
                            }
                        })?;
                    // A replayed plan pointing at a different overload shows
                    // up as a static type the parameter cannot accept.
                    if !self.registry.is_assignable_from(declared, static_type_id) {
                        return Err(CommandError::ArgumentTypeMismatch { index });
                    }
                    let raw = arguments.dequeue().ok_or_else(|| CommandError::PlanIntegrity {
                        message: format!("no client value was sent for argument {index}"),
                    })?;
                    let value = self.deserialize_argument(&raw, static_type_id, index)?;
                    (value, validation_paths.as_mut().and_then(|p| p.dequeue()))
                }
                PlanArgument::Constant { value } => (Value::from_json(value), None),
                PlanArgument::DefaultValue => (self.registry.default_value(declared), None),
                PlanArgument::Inject { service_type } => {
                    let service_type_id =
                        self.registry.find_by_name(service_type).ok_or_else(|| {
                            CommandError::PlanIntegrity {
                                message: format!("unknown service type '{service_type}'"),
                            }
                        })?;
                    let service = services.get(service_type_id).ok_or_else(|| {
                        CommandError::MissingService { type_name: service_type.clone() }
                    })?;
                    (Value::Service(service), None)
                }
                PlanArgument::Invocation { plan } => (
                    self.execute(plan, arguments, validation_paths, services).await?,
                    None,
                ),
            };
            method_args.push(value);
            if let Some(paths) = method_arg_paths.as_mut() {
                paths.push(path);
            }
        }

        let validation = method.allow_static_command.ok_or_else(|| {
            CommandError::NotAllowed { method: self.registry.format_method(&method) }
        })?;

        if validation == StaticCommandValidation::Automatic {
            if let Some(mut state) =
                validate_static_command_arguments(self.registry, &method, &method_args)
            {
                self.resolve_validation_paths(&mut state, &method, method_arg_paths.as_deref())?;
                return Err(CommandError::InvalidModelState(state));
            }
        }

        let result = match &method.body {
            MethodBody::Sync(invoke) => invoke(method_args),
            MethodBody::Async(invoke) => invoke(method_args).await,
        };

        match result {
            Ok(value) => Ok(value),
            Err(MethodError::ModelState(mut state)) => {
                // The target method raised its own model-state error; path
                // resolution happens here so the client can place it.
                self.resolve_validation_paths(&mut state, &method, method_arg_paths.as_deref())?;
                Err(CommandError::InvalidModelState(state))
            }
            Err(MethodError::Invocation(message)) => Err(CommandError::Invocation(message)),
        }
    }

    /// Declared type of the plan argument at `index`; index 0 of an instance
    /// method is the implicit receiver.
    fn parameter_type_at(&self, method: &MethodDescriptor, index: usize) -> TypeId {
        if method.is_static {
            method.parameters[index].parameter_type
        } else if index == 0 {
            method.declaring_type
        } else {
            method.parameters[index - 1].parameter_type
        }
    }

    fn deserialize_argument(
        &self,
        raw: &serde_json::Value,
        ty: TypeId,
        index: usize,
    ) -> Result<Value, CommandError> {
        let value = Value::from_json(raw);
        if conforms(self.registry, &value, ty) {
            return Ok(value);
        }
        // Integers arriving for double parameters widen; anything else is a
        // mismatch between the plan and the sent value.
        velm_common::convert_value(self.registry, &value, ty)
            .map_err(|_| CommandError::ArgumentTypeMismatch { index })
    }

    /// Maps every unresolved validation error to a concrete client path:
    /// the argument name resolves to a parameter position (`"this"` is the
    /// receiver), and the client-declared path for that position is spliced
    /// with the intra-argument path.
    pub fn resolve_validation_paths(
        &self,
        state: &mut StaticCommandModelState,
        method: &MethodDescriptor,
        argument_paths: Option<&[Option<String>]>,
    ) -> Result<(), CommandError> {
        for error in state.errors.iter_mut().filter(|e| !e.is_resolved) {
            let Some(argument_paths) = argument_paths else {
                return Err(CommandError::ValidationPathsNotProvided);
            };

            let argument_name = error.argument_name.clone().unwrap_or_default();
            let parameter_index = if let Some(position) =
                method.parameters.iter().position(|p| p.name == argument_name)
            {
                position + usize::from(!method.is_static)
            } else if argument_name == "this" && !method.is_static {
                0
            } else {
                return Err(CommandError::UnmappableArgument {
                    argument: argument_name,
                    method: self.registry.format_method(method),
                });
            };

            let property_path =
                error.property_path.as_deref().unwrap_or_default().trim_matches('/').to_string();
            let argument_path = argument_paths
                .get(parameter_index)
                .cloned()
                .flatten()
                .ok_or(CommandError::MissingValidationPath { argument: argument_name })?;

            let argument_path = argument_path.trim_end_matches('/');
            error.property_path =
                Some(format!("{argument_path}/{property_path}").trim_end_matches('/').to_string());
            error.is_resolved = true;
        }
        Ok(())
    }
}
