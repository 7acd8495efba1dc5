//! 入站 / 出站轮次
//!
//! 入站：用户消息，或针对待确认动作的结构化决定（批准 / 拒绝 / 修改参数）。
//! 出站：回复文本、过程事件、可选的确认请求，以及当前激活作用域与栈深度（可观测性）。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::TurnEvent;

const APPROVE_WORDS: &[&str] = &["y", "yes", "approve", "approved", "confirm", "ok", "okay"];
const DENY_WORDS: &[&str] = &["n", "no", "deny", "cancel", "stop"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundTurn {
    Message {
        text: String,
    },
    Confirmation {
        #[serde(default)]
        token: Option<Uuid>,
        decision: ConfirmationDecision,
    },
}

impl InboundTurn {
    pub fn message(text: impl Into<String>) -> Self {
        InboundTurn::Message { text: text.into() }
    }

    pub fn approve(token: Option<Uuid>) -> Self {
        InboundTurn::Confirmation {
            token,
            decision: ConfirmationDecision::Approve,
        }
    }

    pub fn deny(token: Option<Uuid>, reason: Option<&str>) -> Self {
        InboundTurn::Confirmation {
            token,
            decision: ConfirmationDecision::Deny {
                reason: reason.map(str::to_string),
            },
        }
    }

    pub fn modify(token: Option<Uuid>, args: Value) -> Self {
        InboundTurn::Confirmation {
            token,
            decision: ConfirmationDecision::Modify { args },
        }
    }

    /// 写入对话时的文本形式
    pub fn transcript(&self) -> String {
        match self {
            InboundTurn::Message { text } => text.clone(),
            InboundTurn::Confirmation { decision, .. } => match decision {
                ConfirmationDecision::Approve => "[confirmation] approve".to_string(),
                ConfirmationDecision::Deny { reason: Some(r) } => format!("[confirmation] deny: {r}"),
                ConfirmationDecision::Deny { reason: None } => "[confirmation] deny".to_string(),
                ConfirmationDecision::Modify { args } => format!("[confirmation] modify: {args}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Approve,
    Deny {
        #[serde(default)]
        reason: Option<String>,
    },
    /// 以对象补丁方式修改待确认参数，修改后需重新确认
    Modify { args: Value },
}

impl ConfirmationDecision {
    /// 等待确认期间的自由文本：肯定词为批准，其余一律视为拒绝，文本本身作为拒绝理由
    pub fn from_text(text: &str) -> Self {
        let normalized = text.trim().trim_end_matches(['.', '!']).to_lowercase();
        if APPROVE_WORDS.contains(&normalized.as_str()) {
            ConfirmationDecision::Approve
        } else if normalized.is_empty() || DENY_WORDS.contains(&normalized.as_str()) {
            ConfirmationDecision::Deny { reason: None }
        } else {
            ConfirmationDecision::Deny {
                reason: Some(text.trim().to_string()),
            }
        }
    }
}

/// 请求用户确认写操作
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationPrompt {
    pub token: Uuid,
    pub action: String,
    pub args: Value,
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundTurn {
    pub conversation_id: String,
    pub text: String,
    pub events: Vec<TurnEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationPrompt>,
    pub active_scope: String,
    pub stack_depth: usize,
}
