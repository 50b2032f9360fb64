//! Compiles a bound command expression into an invocation plan.
//!
//! Constants embed as literals, injected parameters become service
//! references, nested registered calls become nested plans, and anything
//! that reads the client's view-model state becomes a client-supplied
//! `Argument` slot typed with the expression's static type.

use velm_binder::typed::{ConversionKind, TypedExpr};
use velm_common::types::TypeRegistry;

use crate::executor::CommandError;
use crate::plan::{PlanArgument, StaticCommandInvocationPlan};

/// Builds the invocation plan for a bound static-command expression. The
/// expression must bottom out in a call to a method allowed for static
/// commands.
pub fn plan_from_expression(
    registry: &TypeRegistry,
    expr: &TypedExpr,
) -> Result<StaticCommandInvocationPlan, CommandError> {
    match expr {
        // Command bindings are wrapped in a lambda; the plan describes the
        // body.
        TypedExpr::Lambda { body, .. } => plan_from_expression(registry, body),
        TypedExpr::Convert { operand, kind: ConversionKind::Identity, .. } => {
            plan_from_expression(registry, operand)
        }
        TypedExpr::MethodCall { method, target, arguments, .. } => {
            if method.allow_static_command.is_none() {
                return Err(CommandError::NotAllowed {
                    method: registry.format_method(method),
                });
            }

            let mut plan_arguments = Vec::new();
            if let Some(target) = target {
                plan_arguments.push(argument_plan(registry, target)?);
            }

            let mut supplied = arguments.iter();
            for parameter in &method.parameters {
                if parameter.inject {
                    plan_arguments.push(PlanArgument::Inject {
                        service_type: registry.name_of(parameter.parameter_type),
                    });
                    continue;
                }
                match supplied.next() {
                    Some(argument) => plan_arguments.push(argument_plan(registry, argument)?),
                    None => plan_arguments.push(PlanArgument::DefaultValue),
                }
            }

            Ok(StaticCommandInvocationPlan::new(method.id.clone(), plan_arguments))
        }
        other => Err(CommandError::UnsupportedCommand {
            construct: format!("{} as the command root", other.kind_name()),
        }),
    }
}

fn argument_plan(
    registry: &TypeRegistry,
    expr: &TypedExpr,
) -> Result<PlanArgument, CommandError> {
    match expr {
        TypedExpr::Constant { value, .. } => match value.to_json() {
            Ok(json) => Ok(PlanArgument::Constant { value: json }),
            Err(_) => Err(CommandError::UnsupportedCommand {
                construct: "a service-reference constant".to_string(),
            }),
        },
        TypedExpr::Convert { operand, kind: ConversionKind::Identity, .. } => {
            argument_plan(registry, operand)
        }
        TypedExpr::MethodCall { .. } => Ok(PlanArgument::Invocation {
            plan: Box::new(plan_from_expression(registry, expr)?),
        }),
        TypedExpr::Lambda { .. } | TypedExpr::StaticTypeRef { .. } => {
            Err(CommandError::UnsupportedCommand {
                construct: format!("{} as a command argument", expr.kind_name()),
            })
        }
        // Everything that reads client state is supplied by the client at
        // invocation time.
        _ => Ok(PlanArgument::Argument { static_type: registry.name_of(expr.type_of()) }),
    }
}
