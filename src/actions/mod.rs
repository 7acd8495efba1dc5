//! 动作层：注册表、参数 Schema、控制标记、执行器与结果类型

pub mod control;
pub mod executor;
pub mod registry;
pub mod result;
pub mod schema;

pub use control::ControlAction;
pub use executor::{
    write_deadline, ActionExecutor, ApprovedInvocation, Invocation, PendingInvocation, Prepared,
    ReadOnlyInvocation,
};
pub use registry::{
    handler_fn, ActionClass, ActionDescriptor, ActionFault, ActionHandler, ActionRegistry,
    FnHandler, RegisteredAction,
};
pub use result::{ActionFailure, ActionResult, FailureKind, Outcome};
pub use schema::{proposal_schema_json, ArgKind, ArgSchema, ValidationError};
