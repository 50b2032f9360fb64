//! Static-command invocation plans, protection and execution.
//!
//! A static command is a server method invoked directly from client script
//! without a full postback. The server compiles the bound command expression
//! into an invocation plan, encrypts it into an opaque token, and on each
//! request decrypts the token, replays the plan against registered methods
//! and maps validation failures back to client-addressable property paths.

pub mod plan;
pub use plan::{PlanArgument, StaticCommandInvocationPlan, deserialize_plan, serialize_plan};

pub mod protect;
pub use protect::{KeyedHashProtector, ProtectionError, ViewModelProtector};

pub mod builder;
pub use builder::plan_from_expression;

pub mod executor;
pub use executor::{ArgumentCursor, CommandError, StaticCommandExecutor, ValidationPathCursor};

pub mod validator;
pub use validator::validate_static_command_arguments;
