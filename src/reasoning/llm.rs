//! LLM 推理适配器：拼 system prompt、调用 LLM、解析提案
//!
//! system prompt = 基础提示 + 当前助手说明 + 工作记忆 + 可用动作列表 + 提案 JSON Schema；
//! parse_decision 从回复中提取 JSON，解析为动作提案、多意图澄清或直接回复。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::proposal_schema_json;
use crate::llm::{ChatMessage, LlmClient};
use crate::memory::Role;
use crate::reasoning::{ActionProposal, ConversationView, Decision, ReasoningAdapter, ReasoningError};

const DECISION_KEYS: [&str; 2] = ["\"action\"", "\"ambiguous\""];

const DEFAULT_CLARIFICATION: &str =
    "I noticed several requests in your message. Which one should I handle first?";

/// 解析 LLM 输出：
/// - 含 `"ambiguous"` 数组的 JSON → Ambiguous
/// - 含非空 `"action"` 的 JSON → Propose
/// - 不含 JSON，或 JSON 中没有 action / ambiguous 键 → Respond
pub fn parse_decision(output: &str) -> Result<Decision, ReasoningError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ReasoningError::Malformed("empty response".to_string()));
    }

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        // 普通回复里也可能有花括号（如 "Your ref {ABC}"），只有带决策键时才按 JSON 解析
        if end <= start || !DECISION_KEYS.iter().any(|k| trimmed[start..=end].contains(k)) {
            return Ok(Decision::Respond(trimmed.to_string()));
        }
        &trimmed[start..=end]
    } else {
        return Ok(Decision::Respond(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| ReasoningError::Malformed(format!("{}: {}", e, json_str)))?;
    if value.get("action").is_none() && value.get("ambiguous").is_none() {
        return Ok(Decision::Respond(trimmed.to_string()));
    }

    if let Some(intents) = value.get("ambiguous").and_then(Value::as_array) {
        let intents: Vec<String> = intents
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let question = value
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CLARIFICATION)
            .to_string();
        return Ok(Decision::Ambiguous { question, intents });
    }

    let proposal: ActionProposal = serde_json::from_value(value)
        .map_err(|e| ReasoningError::Malformed(format!("{}: {}", e, json_str)))?;
    if proposal.action.trim().is_empty() {
        Ok(Decision::Respond(trimmed.to_string()))
    } else {
        Ok(Decision::Propose(proposal))
    }
}

pub struct LlmReasoningAdapter {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmReasoningAdapter {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn build_system(&self, view: &ConversationView<'_>) -> String {
        let actions = serde_json::to_string_pretty(view.permitted).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{base}\n\n## Active assistant\n{scope}: {desc}\n\n{memory}## Available actions\n```json\n{actions}\n```\n\n\
             ## Output format\nTo act, output exactly one JSON object matching this schema:\n```json\n{schema}\n```\n\
             Propose at most one action. Never claim a booking, cancellation or update happened before its result is shown.\n\
             If the message contains several independent requests, output {{\"ambiguous\": [\"request\", ...], \"question\": \"...\"}}.\n\
             Otherwise reply to the user in plain text.",
            base = self.system_prompt,
            scope = view.scope,
            desc = view.scope_description,
            memory = view.working_memory.to_prompt_section(),
            actions = actions,
            schema = proposal_schema_json(),
        )
    }

    fn to_messages(&self, view: &ConversationView<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.build_system(view))];
        messages.extend(view.turns.iter().map(|t| match t.role {
            Role::User => ChatMessage::user(t.content.clone()),
            Role::Assistant => ChatMessage::assistant(t.content.clone()),
            Role::ActionResult => ChatMessage::user(format!(
                "[action result: {}] {}",
                t.action.as_deref().unwrap_or("unknown"),
                t.content
            )),
            Role::Control => ChatMessage::user(format!("[system note] {}", t.content)),
        }));
        messages
    }
}

#[async_trait]
impl ReasoningAdapter for LlmReasoningAdapter {
    async fn propose(&self, view: &ConversationView<'_>) -> Result<Decision, ReasoningError> {
        let output = self
            .llm
            .complete(&self.to_messages(view))
            .await
            .map_err(ReasoningError::Unavailable)?;
        parse_decision(&output)
    }
}
