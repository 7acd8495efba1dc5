//! 动作结果：成功载荷或结构化失败（种类 + 说明 + 补救提示）

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::schema::ValidationError;
use crate::actions::ActionClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    NotFound,
    Conflict,
    ExternalUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::Conflict => "conflict",
            FailureKind::ExternalUnavailable => "external_unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    /// 面向用户 / 适配器的补救提示；写操作失败时总会说明未做任何改动
    pub hint: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: Value },
    Failure(ActionFailure),
}

/// 单次动作执行的结果，生成后不可变
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: String,
    pub class: ActionClass,
    pub outcome: Outcome,
}

impl ActionResult {
    pub fn success(action: impl Into<String>, class: ActionClass, payload: Value) -> Self {
        Self {
            action: action.into(),
            class,
            outcome: Outcome::Success { payload },
        }
    }

    pub fn failure(
        action: impl Into<String>,
        class: ActionClass,
        kind: FailureKind,
        message: impl Into<String>,
        argument: Option<String>,
    ) -> Self {
        let hint = remediation(kind, class, argument.as_deref());
        Self {
            action: action.into(),
            class,
            outcome: Outcome::Failure(ActionFailure {
                kind,
                message: message.into(),
                argument,
                hint,
            }),
        }
    }

    pub fn from_validation(action: impl Into<String>, class: ActionClass, err: &ValidationError) -> Self {
        Self::failure(
            action,
            class,
            FailureKind::Validation,
            err.to_string(),
            Some(err.argument.clone()),
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn failure_info(&self) -> Option<&ActionFailure> {
        match &self.outcome {
            Outcome::Failure(f) => Some(f),
            Outcome::Success { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    /// 写入对话与出站文本的渲染形式
    pub fn render(&self) -> String {
        match &self.outcome {
            Outcome::Success { payload } => format!("{} succeeded: {}", self.action, payload),
            Outcome::Failure(f) => format!(
                "{} failed ({}): {}. {}",
                self.action, f.kind, f.message, f.hint
            ),
        }
    }
}

fn remediation(kind: FailureKind, class: ActionClass, argument: Option<&str>) -> String {
    let mut hint = match (kind, argument) {
        (FailureKind::Validation, Some(arg)) => {
            format!("Correct the '{arg}' argument and propose the action again.")
        }
        (FailureKind::Validation, None) => "Correct the arguments and propose the action again.".to_string(),
        (FailureKind::NotFound, _) => {
            "Check the identifier; search first to find a valid one.".to_string()
        }
        (FailureKind::Conflict, _) => {
            "The record is in a conflicting state; search again before retrying.".to_string()
        }
        (FailureKind::ExternalUnavailable, _) => {
            "The backing service did not respond; try again later.".to_string()
        }
    };
    if class == ActionClass::StateMutating {
        hint.push_str(" No reservation was changed.");
    }
    hint
}
