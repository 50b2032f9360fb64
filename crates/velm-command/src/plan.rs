//! The invocation plan tree and its wire form.
//!
//! A plan names a registered method by its stable identifier and describes
//! how every argument is sourced. Serialization is deterministic (fixed
//! field order, no timestamps), so equal plans produce equal bytes and the
//! encrypted token round-trips structurally.

use serde::{Deserialize, Serialize};

/// How one argument of an invocation is sourced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanArgument {
    /// Supplied by the client at invocation time; `static_type` records the
    /// compile-time type the plan was built against.
    Argument { static_type: String },
    /// A literal embedded into the plan.
    Constant { value: serde_json::Value },
    /// The declared parameter's default value.
    DefaultValue,
    /// Resolved from the request's service scope.
    Inject { service_type: String },
    /// The result of a nested invocation.
    Invocation { plan: Box<StaticCommandInvocationPlan> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticCommandInvocationPlan {
    /// Stable method identifier, `Type.Method(ParamType,...)`.
    pub method: String,
    /// One entry per method parameter, plus a leading entry for the
    /// implicit `this` of instance methods.
    pub arguments: Vec<PlanArgument>,
}

impl StaticCommandInvocationPlan {
    pub fn new(method: impl Into<String>, arguments: Vec<PlanArgument>) -> Self {
        StaticCommandInvocationPlan { method: method.into(), arguments }
    }

    /// Number of client-supplied `Argument` slots in the whole tree, in
    /// plan-declaration order.
    pub fn client_argument_count(&self) -> usize {
        self.arguments
            .iter()
            .map(|a| match a {
                PlanArgument::Argument { .. } => 1,
                PlanArgument::Invocation { plan } => plan.client_argument_count(),
                _ => 0,
            })
            .sum()
    }
}

pub fn serialize_plan(plan: &StaticCommandInvocationPlan) -> Vec<u8> {
    // Plans contain only JSON-representable data; serialization cannot fail.
    serde_json::to_vec(plan).unwrap_or_default()
}

pub fn deserialize_plan(bytes: &[u8]) -> Result<StaticCommandInvocationPlan, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> StaticCommandInvocationPlan {
        StaticCommandInvocationPlan::new(
            "Orders.Delete(int,string)",
            vec![
                PlanArgument::Argument { static_type: "int".into() },
                PlanArgument::Constant { value: serde_json::json!("x") },
                PlanArgument::Invocation {
                    plan: Box::new(StaticCommandInvocationPlan::new(
                        "Orders.Find(int)",
                        vec![PlanArgument::Argument { static_type: "int".into() }],
                    )),
                },
            ],
        )
    }

    #[test]
    fn test_serialization_round_trips() {
        let plan = sample_plan();
        let bytes = serialize_plan(&plan);
        let parsed = deserialize_plan(&bytes).expect("deserialize");
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        assert_eq!(serialize_plan(&sample_plan()), serialize_plan(&sample_plan()));
    }

    #[test]
    fn test_client_argument_count_spans_nested_plans() {
        assert_eq!(sample_plan().client_argument_count(), 2);
    }

    #[test]
    fn test_garbage_does_not_deserialize() {
        assert!(deserialize_plan(b"{\"method\":1}").is_err());
        assert!(deserialize_plan(b"not json").is_err());
    }
}
