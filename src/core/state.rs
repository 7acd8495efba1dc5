//! 会话状态投影：前端 / HTTP 只看到轻量的 ConversationSnapshot

use serde::Serialize;

use crate::core::confirmation::GatePhase;
use crate::core::{ConfirmationPrompt, ConversationState, DispatchError};
use crate::scope::ScopeTable;

/// 某一时刻的会话快照（只读）
#[derive(Clone, Debug, Serialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub active_scope: String,
    /// 从主作用域到激活作用域的路径
    pub stack: Vec<String>,
    pub depth: usize,
    pub gate: GatePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<ConfirmationPrompt>,
    pub turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ConversationState {
    pub fn snapshot(&self, scopes: &ScopeTable) -> Result<ConversationSnapshot, DispatchError> {
        let stack = self.stack.path(scopes)?;
        let active_scope = stack.last().cloned().unwrap_or_default();
        Ok(ConversationSnapshot {
            conversation_id: self.id.clone(),
            active_scope,
            depth: stack.len(),
            stack,
            gate: self.gate.phase(),
            pending: self.gate.pending().map(|p| p.prompt()),
            turns: self.conversation.len(),
            aborted: self.aborted.clone(),
        })
    }
}
