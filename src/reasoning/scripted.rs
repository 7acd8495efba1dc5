//! 脚本化适配器（用于测试，无需 API）
//!
//! 按顺序吐出预设决策，并记录每次收到的视图，便于断言适配器看到了什么。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::memory::{Turn, WorkingMemory};
use crate::reasoning::{ConversationView, Decision, ReasoningAdapter, ReasoningError};

pub const SCRIPT_EXHAUSTED_REPLY: &str = "Is there anything else I can help with?";

/// 适配器收到的视图快照
#[derive(Debug, Clone)]
pub struct SeenView {
    pub scope: String,
    pub turns: Vec<Turn>,
    pub working_memory: WorkingMemory,
    pub permitted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<Decision, ReasoningError>>>,
    seen: Mutex<Vec<SeenView>>,
}

impl ScriptedAdapter {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            script: Mutex::new(decisions.into_iter().map(Ok).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 空脚本的共享实例
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, decision: Decision) {
        self.lock_script().push_back(Ok(decision));
    }

    pub fn push_error(&self, err: ReasoningError) {
        self.lock_script().push_back(Err(err));
    }

    pub fn seen(&self) -> Vec<SeenView> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Decision, ReasoningError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ReasoningAdapter for ScriptedAdapter {
    async fn propose(&self, view: &ConversationView<'_>) -> Result<Decision, ReasoningError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SeenView {
                scope: view.scope.to_string(),
                turns: view.turns.to_vec(),
                working_memory: view.working_memory.clone(),
                permitted: view.permitted_names(),
            });
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| Ok(Decision::respond(SCRIPT_EXHAUSTED_REPLY)))
    }
}
