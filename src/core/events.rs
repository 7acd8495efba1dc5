//! 单轮过程事件：委派、交还、动作执行、确认请求与决定、纠正、澄清

use serde::Serialize;
use uuid::Uuid;

use crate::actions::ActionResult;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Delegated {
        from: String,
        to: String,
    },
    Completed {
        from: String,
        to: String,
        summary: String,
    },
    Escalated {
        from: String,
        to: String,
        reason: String,
    },
    /// 动作已执行（成功或结构化失败）
    ActionExecuted {
        result: ActionResult,
    },
    /// 动作在执行前被拒绝（参数校验失败）
    ActionRejected {
        result: ActionResult,
    },
    ConfirmationRequested {
        token: Uuid,
        action: String,
    },
    /// 新的写操作提案替换了尚未确认的旧提案
    ConfirmationReplaced {
        previous: Uuid,
        action: String,
    },
    ConfirmationModified {
        previous: Uuid,
        token: Uuid,
    },
    ConfirmationDenied {
        token: Uuid,
        action: String,
        reason: Option<String>,
    },
    ConfirmationStale {
        expected: Uuid,
        got: Uuid,
    },
    AlreadyResolved {
        token: Uuid,
    },
    NothingPending,
    /// 写给推理适配器的纠正提示
    Correction {
        message: String,
    },
    Clarification {
        question: String,
        intents: Vec<String>,
    },
    Response {
        text: String,
    },
    /// 无操作（如在主作用域上 complete / escalate）
    NoOp {
        message: String,
    },
    ReasoningUnavailable {
        message: String,
    },
    StepLimitReached {
        limit: usize,
    },
}
