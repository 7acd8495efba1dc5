//! 错误恢复引擎
//!
//! 根据 DispatchError 返回 RecoveryAction，供 Dispatcher 决定是写入纠正提示、向用户说明还是终止会话。

use crate::core::{DispatchError, RecoveryAction};

/// 语义化错误恢复：将调度错误映射为对话内可执行的动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &DispatchError) -> RecoveryAction {
        match err {
            DispatchError::ActionNotPermittedForScope { scope, action } => {
                RecoveryAction::Correction(format!(
                    "Action '{action}' is not available in the {scope} scope. \
                     Use one of the listed actions, or escalate if the request belongs elsewhere."
                ))
            }
            DispatchError::UnknownAction(name) => RecoveryAction::Correction(format!(
                "There is no action named '{name}'. Only propose actions from the provided list."
            )),
            DispatchError::UnknownScope(name) => RecoveryAction::Correction(format!(
                "There is no assistant named '{name}'. Delegate only to a registered scope."
            )),
            DispatchError::DelegationTooDeep(limit) => RecoveryAction::Correction(format!(
                "Delegation is nested {limit} levels deep already. Complete or escalate before delegating again."
            )),
            DispatchError::CannotPopPrimary => RecoveryAction::Report(
                "Nothing to hand back: the primary assistant is already in control.".to_string(),
            ),
            DispatchError::InvariantViolated(diag) => RecoveryAction::Abort(diag.clone()),
            other => RecoveryAction::Report(other.to_string()),
        }
    }
}
