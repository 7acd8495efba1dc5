//! 调度错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：除 InvariantViolated 外，所有错误都在 Dispatcher / Gate 边界
//! 被转换为对话内的纠正、说明或澄清，不会终止会话。

use thiserror::Error;

/// 调度过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Action '{action}' is not permitted in scope '{scope}'")]
    ActionNotPermittedForScope { scope: String, action: String },

    /// 栈中只剩主作用域时 complete / escalate，按无操作处理
    #[error("Cannot pop the primary scope")]
    CannotPopPrimary,

    #[error("Delegation depth limit reached ({0})")]
    DelegationTooDeep(usize),

    #[error("Duplicate action: {0}")]
    DuplicateAction(String),

    #[error("Duplicate scope: {0}")]
    DuplicateScope(String),

    /// 核心簿记自身的不变量被破坏，唯一的致命错误
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    #[error("Conversation aborted: {0}")]
    ConversationAborted(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::InvariantViolated(_))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 写入对话作为纠正提示，下一轮由推理适配器据此重试
    Correction(String),
    /// 向用户说明（无操作或失败原因）
    Report(String),
    /// 终止会话并附带诊断
    Abort(String),
}
