//! 推理适配器契约
//!
//! 每个作用域持有一个适配器：给定对话视图与可用动作，返回「直接回复 / 提出一个动作 / 多意图需澄清」。
//! 适配器只提案，从不自行执行副作用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Turn, WorkingMemory};

/// 单个动作提案（简化 JSON：{"action": "search_hotels", "args": {"location": "..."}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

impl ActionProposal {
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }
}

/// 适配器的决策：每轮至多一个动作
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Respond(String),
    Propose(ActionProposal),
    /// 检测到多个意图，需要用户澄清
    Ambiguous { question: String, intents: Vec<String> },
}

impl Decision {
    pub fn propose(action: impl Into<String>, args: Value) -> Self {
        Decision::Propose(ActionProposal::new(action, args))
    }

    pub fn respond(text: impl Into<String>) -> Self {
        Decision::Respond(text.into())
    }
}

/// 传给适配器的只读视图
#[derive(Debug, Clone, Copy)]
pub struct ConversationView<'a> {
    pub scope: &'a str,
    pub scope_description: &'a str,
    pub turns: &'a [Turn],
    pub working_memory: &'a WorkingMemory,
    /// 当前作用域可用动作的描述（含控制标记）
    pub permitted: &'a [Value],
}

impl<'a> ConversationView<'a> {
    pub fn permitted_names(&self) -> Vec<String> {
        self.permitted
            .iter()
            .filter_map(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning service timed out")]
    Timeout,

    #[error("malformed proposal: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ReasoningAdapter: Send + Sync {
    async fn propose(&self, view: &ConversationView<'_>) -> Result<Decision, ReasoningError>;
}
