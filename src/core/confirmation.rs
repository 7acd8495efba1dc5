//! 确认闸门：写操作的两阶段提交
//!
//! Idle ⇄ AwaitingConfirmation。写操作提案先被拦截为待确认调用，只有用户明确批准后
//! 才构造 ApprovedInvocation 并交给执行器。每个待确认调用带一个令牌；已决令牌记录在案，
//! 重复批准不会再次执行。

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::actions::schema::merge_args;
use crate::actions::{ActionClass, ActionExecutor, ActionResult, ApprovedInvocation, PendingInvocation};
use crate::core::{ConfirmationDecision, ConfirmationPrompt};
use crate::scope::ScopeId;

#[derive(Clone)]
pub struct PendingConfirmation {
    pub token: Uuid,
    /// 提出该动作的作用域
    pub scope: ScopeId,
    /// 提出时的对话长度
    pub requested_at: usize,
    invocation: PendingInvocation,
}

impl PendingConfirmation {
    pub fn action(&self) -> &str {
        self.invocation.name()
    }

    pub fn args(&self) -> &Value {
        self.invocation.args()
    }

    pub fn prompt(&self) -> ConfirmationPrompt {
        ConfirmationPrompt {
            token: self.token,
            action: self.action().to_string(),
            args: self.args().clone(),
            question: format!(
                "I'm about to run {} with {}. Shall I go ahead? (yes / no, or send changes)",
                self.action(),
                self.args()
            ),
        }
    }
}

impl fmt::Debug for PendingConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingConfirmation")
            .field("token", &self.token)
            .field("action", &self.action())
            .field("args", self.args())
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    AwaitingConfirmation,
}

#[derive(Debug, Default)]
enum GateState {
    #[default]
    Idle,
    Awaiting(PendingConfirmation),
}

/// 恢复（resume）的结果，由 Dispatcher 写入对话与出站事件
#[derive(Debug)]
pub enum Resolution {
    Approved {
        token: Uuid,
        scope: ScopeId,
        result: ActionResult,
    },
    Denied {
        token: Uuid,
        action: String,
        reason: Option<String>,
    },
    /// 参数修改通过校验，换发新令牌并重新请求确认
    Modified {
        previous: Uuid,
        prompt: ConfirmationPrompt,
    },
    /// 修改后的参数未通过校验，原待确认调用保持不变
    ModifyRejected {
        result: ActionResult,
        prompt: ConfirmationPrompt,
    },
    Stale {
        expected: Uuid,
        got: Uuid,
    },
    AlreadyResolved {
        token: Uuid,
    },
    NothingPending,
}

/// 记住的已决令牌上限；更早的令牌被淘汰后再提交只会得到 Stale 或 NothingPending
const RESOLVED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub struct ConfirmationGate {
    state: GateState,
    resolved: HashSet<Uuid>,
    resolved_order: VecDeque<Uuid>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> GatePhase {
        match self.state {
            GateState::Idle => GatePhase::Idle,
            GateState::Awaiting(_) => GatePhase::AwaitingConfirmation,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, GateState::Awaiting(_))
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        match &self.state {
            GateState::Awaiting(p) => Some(p),
            GateState::Idle => None,
        }
    }

    /// 拦截写调用。已有待确认调用时将其替换，返回被替换者
    pub fn intercept(
        &mut self,
        invocation: PendingInvocation,
        scope: ScopeId,
        requested_at: usize,
    ) -> (ConfirmationPrompt, Option<PendingConfirmation>) {
        let pending = PendingConfirmation {
            token: Uuid::new_v4(),
            scope,
            requested_at,
            invocation,
        };
        let prompt = pending.prompt();
        let replaced = match std::mem::replace(&mut self.state, GateState::Awaiting(pending)) {
            GateState::Awaiting(previous) => {
                tracing::info!(previous = %previous.token, action = %previous.action(), "pending confirmation replaced");
                Some(previous)
            }
            GateState::Idle => None,
        };
        tracing::info!(token = %prompt.token, action = %prompt.action, "confirmation requested");
        (prompt, replaced)
    }

    /// 处理用户对待确认调用的决定。token 为 None 时作用于当前待确认调用
    pub async fn resume(
        &mut self,
        token: Option<Uuid>,
        decision: ConfirmationDecision,
        executor: &ActionExecutor,
    ) -> Resolution {
        if let Some(t) = token {
            if self.resolved.contains(&t) {
                return Resolution::AlreadyResolved { token: t };
            }
        }
        let expected = match &self.state {
            GateState::Idle => return Resolution::NothingPending,
            GateState::Awaiting(p) => p.token,
        };
        if let Some(got) = token {
            if got != expected {
                return Resolution::Stale { expected, got };
            }
        }

        match decision {
            ConfirmationDecision::Approve => {
                let GateState::Awaiting(pending) = std::mem::take(&mut self.state) else {
                    return Resolution::NothingPending;
                };
                // 先记录令牌再执行：即使执行失败，同一令牌也不会再次执行
                self.remember(pending.token);
                tracing::info!(token = %pending.token, action = %pending.action(), "confirmation approved");
                let result = executor
                    .execute_approved(ApprovedInvocation::approve(pending.invocation))
                    .await;
                Resolution::Approved {
                    token: pending.token,
                    scope: pending.scope,
                    result,
                }
            }
            ConfirmationDecision::Deny { reason } => {
                let GateState::Awaiting(pending) = std::mem::take(&mut self.state) else {
                    return Resolution::NothingPending;
                };
                self.remember(pending.token);
                tracing::info!(token = %pending.token, action = %pending.action(), "confirmation denied");
                Resolution::Denied {
                    token: pending.token,
                    action: pending.action().to_string(),
                    reason,
                }
            }
            ConfirmationDecision::Modify { args } => {
                let GateState::Awaiting(pending) = &mut self.state else {
                    return Resolution::NothingPending;
                };
                match merge_args(pending.args(), &args).and_then(|merged| pending.invocation.rebind(merged)) {
                    Ok(rebound) => {
                        let previous = pending.token;
                        pending.invocation = rebound;
                        pending.token = Uuid::new_v4();
                        tracing::info!(previous = %previous, token = %pending.token, "pending confirmation modified");
                        Resolution::Modified {
                            previous,
                            prompt: pending.prompt(),
                        }
                    }
                    Err(e) => Resolution::ModifyRejected {
                        result: ActionResult::from_validation(
                            pending.action(),
                            ActionClass::StateMutating,
                            &e,
                        ),
                        prompt: pending.prompt(),
                    },
                }
            }
        }
    }

    fn remember(&mut self, token: Uuid) {
        if self.resolved.insert(token) {
            self.resolved_order.push_back(token);
        }
        while self.resolved_order.len() > RESOLVED_CAPACITY {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }
}
