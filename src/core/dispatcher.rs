//! 调度器：每个入站轮次的主控循环
//!
//! 单轮流程：
//! 1. 写入用户轮次；若闸门在等待确认（或入站本身是确认决定），交给闸门处理后结束
//! 2. 否则循环：取激活作用域的适配器提案 → 控制标记转为栈操作 / 只读动作直接执行 / 写动作交给闸门
//! 3. 回复、澄清、写操作待确认、失败或步数耗尽时结束本轮
//!
//! 非致命错误一律经 RecoveryEngine 转为对话内的纠正或说明；只有 InvariantViolated 会终止会话。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::actions::{ActionRegistry, ActionResult, ControlAction, Prepared, ActionExecutor};
use crate::core::confirmation::{ConfirmationGate, Resolution};
use crate::core::{
    ConfirmationDecision, DispatchError, InboundTurn, OutboundTurn, RecoveryAction, RecoveryEngine,
    TurnEvent,
};
use crate::memory::{Conversation, Turn};
use crate::reasoning::{ActionProposal, ConversationView, Decision, ReasoningError};
use crate::scope::{DelegationStack, HandbackKind, ScopeId, ScopeTable};

const UNAVAILABLE_REPLY: &str =
    "I can't reach the planning service right now, so nothing was changed. Please try again shortly.";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_steps_per_turn: usize,
    pub reasoning_timeout: Duration,
    pub max_depth: usize,
    pub max_carry_fields: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_steps_per_turn: 6,
            reasoning_timeout: Duration::from_secs(60),
            max_depth: crate::scope::stack::DEFAULT_MAX_DEPTH,
            max_carry_fields: crate::scope::stack::DEFAULT_MAX_CARRY_FIELDS,
        }
    }
}

/// 启动时构建、之后只读共享的运行时组件
pub struct Runtime {
    pub scopes: ScopeTable,
    pub registry: ActionRegistry,
    pub executor: ActionExecutor,
    pub recovery: RecoveryEngine,
    pub settings: DispatcherSettings,
}

/// 单个会话的全部可变状态，由会话锁串行访问
#[derive(Debug)]
pub struct ConversationState {
    pub id: String,
    pub conversation: Conversation,
    pub stack: DelegationStack,
    pub gate: ConfirmationGate,
    /// 致命错误后的诊断；非空时会话拒绝后续轮次
    pub aborted: Option<String>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>, settings: &DispatcherSettings) -> Self {
        Self {
            id: id.into(),
            conversation: Conversation::new(),
            stack: DelegationStack::new(settings.max_depth, settings.max_carry_fields),
            gate: ConfirmationGate::new(),
            aborted: None,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// 单轮累积的事件与面向用户的文本
#[derive(Default)]
struct TurnOutput {
    events: Vec<TurnEvent>,
    lines: Vec<String>,
}

impl TurnOutput {
    fn event(&mut self, event: TurnEvent) {
        self.events.push(event);
    }

    fn say(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    runtime: Arc<Runtime>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn new_conversation(&self, id: impl Into<String>) -> ConversationState {
        ConversationState::new(id, &self.runtime.settings)
    }

    /// 处理一个入站轮次。返回 Err 仅在会话已终止（或本轮触发终止）时
    pub async fn handle_turn(
        &self,
        state: &mut ConversationState,
        inbound: InboundTurn,
    ) -> Result<OutboundTurn, DispatchError> {
        if let Some(diag) = &state.aborted {
            return Err(DispatchError::ConversationAborted(diag.clone()));
        }
        let mut out = TurnOutput::default();
        let outcome = match self.process(state, inbound, &mut out).await {
            Err(e) if !e.is_fatal() => self.recover(state, e, &mut out).map(|_| ()),
            other => other,
        };
        match outcome {
            Ok(()) => self.finish(state, out),
            Err(e) => {
                tracing::error!(conversation = %state.id, error = %e, "conversation aborted");
                let diag = e.to_string();
                state.aborted = Some(diag.clone());
                Err(DispatchError::ConversationAborted(diag))
            }
        }
    }

    async fn process(
        &self,
        state: &mut ConversationState,
        inbound: InboundTurn,
        out: &mut TurnOutput,
    ) -> Result<(), DispatchError> {
        let scope_name = self.scope_name(state.stack.active_scope())?;
        state
            .conversation
            .push(Turn::user(scope_name, inbound.transcript()));

        match inbound {
            InboundTurn::Confirmation { token, decision } => {
                self.resolve_confirmation(state, token, decision, out).await
            }
            InboundTurn::Message { text } if state.gate.is_awaiting() => {
                let decision = ConfirmationDecision::from_text(&text);
                self.resolve_confirmation(state, None, decision, out).await
            }
            InboundTurn::Message { .. } => self.dispatch_loop(state, out).await,
        }
    }

    async fn dispatch_loop(
        &self,
        state: &mut ConversationState,
        out: &mut TurnOutput,
    ) -> Result<(), DispatchError> {
        let limit = self.runtime.settings.max_steps_per_turn;
        for step in 0..limit {
            let active = state.stack.active_scope();
            let scope = self.runtime.scopes.get(active)?;
            let permitted = self.runtime.registry.describe_for(scope);
            let proposed = {
                let view = ConversationView {
                    scope: scope.name(),
                    scope_description: scope.description(),
                    turns: state.conversation.turns(),
                    working_memory: &state.stack.active().memory,
                    permitted: &permitted,
                };
                match timeout(self.runtime.settings.reasoning_timeout, scope.adapter().propose(&view)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReasoningError::Timeout),
                }
            };
            tracing::debug!(conversation = %state.id, scope = %scope.name(), step, "reasoning step");

            let decision = match proposed {
                Ok(decision) => decision,
                Err(ReasoningError::Malformed(detail)) => {
                    let message = format!(
                        "Your last reply could not be read as a decision ({detail}). \
                         Reply with plain text or a single JSON action proposal."
                    );
                    state.conversation.push(Turn::control(scope.name(), &message));
                    out.event(TurnEvent::Correction { message });
                    continue;
                }
                Err(e) => {
                    tracing::warn!(conversation = %state.id, scope = %scope.name(), error = %e, "reasoning unavailable");
                    state
                        .conversation
                        .push(Turn::control(scope.name(), format!("Reasoning failed: {e}")));
                    out.event(TurnEvent::ReasoningUnavailable {
                        message: e.to_string(),
                    });
                    out.say(UNAVAILABLE_REPLY);
                    return Ok(());
                }
            };

            match decision {
                Decision::Respond(text) => {
                    state.conversation.push(Turn::assistant(scope.name(), &text));
                    out.event(TurnEvent::Response { text: text.clone() });
                    out.say(text);
                    return Ok(());
                }
                Decision::Ambiguous { question, intents } => {
                    state.conversation.push(Turn::assistant(scope.name(), &question));
                    out.say(question.clone());
                    out.event(TurnEvent::Clarification { question, intents });
                    return Ok(());
                }
                Decision::Propose(proposal) => {
                    if let Flow::Stop = self.apply_proposal(state, active, proposal, out).await? {
                        return Ok(());
                    }
                }
            }
        }

        tracing::warn!(conversation = %state.id, limit, "step budget exhausted");
        let scope_name = self.scope_name(state.stack.active_scope())?;
        state.conversation.push(Turn::control(
            scope_name,
            format!("Step budget of {limit} reached for this turn."),
        ));
        out.event(TurnEvent::StepLimitReached { limit });
        out.say("I wasn't able to finish that in one go. Could you tell me how you'd like to continue?");
        Ok(())
    }

    async fn apply_proposal(
        &self,
        state: &mut ConversationState,
        active: ScopeId,
        proposal: ActionProposal,
        out: &mut TurnOutput,
    ) -> Result<Flow, DispatchError> {
        let registry = &self.runtime.registry;
        let scope = self.runtime.scopes.get(active)?;
        let ActionProposal { action, args } = proposal;

        if let Some(parsed) = ControlAction::parse(&action, &args) {
            return match parsed {
                Ok(control) => self.apply_control(state, control, out),
                Err(e) => {
                    let result = ActionResult::from_validation(
                        &action,
                        crate::actions::ActionClass::ReadOnly,
                        &e,
                    );
                    self.record_rejection(state, scope.name(), result, out);
                    Ok(Flow::Stop)
                }
            };
        }

        if !registry.contains(&action) {
            return self.recover(state, DispatchError::UnknownAction(action), out);
        }
        if !registry.is_permitted(scope, &action) {
            tracing::warn!(conversation = %state.id, scope = %scope.name(), action = %action, "action not permitted");
            let err = DispatchError::ActionNotPermittedForScope {
                scope: scope.name().to_string(),
                action,
            };
            return self.recover(state, err, out);
        }

        let registered = registry.resolve(&action)?;
        match self.runtime.executor.prepare(registered, args) {
            Err(result) => {
                self.record_rejection(state, scope.name(), result, out);
                Ok(Flow::Stop)
            }
            Ok(Prepared::ReadOnly(invocation)) => {
                let result = self.runtime.executor.execute_read_only(invocation).await;
                state
                    .conversation
                    .push(Turn::action_result(scope.name(), &action, result.render()));
                let failed = !result.is_success();
                if failed {
                    out.say(result.render());
                }
                out.event(TurnEvent::ActionExecuted { result });
                Ok(if failed { Flow::Stop } else { Flow::Continue })
            }
            Ok(Prepared::NeedsConfirmation(pending)) => {
                let requested_at = state.conversation.len();
                let (prompt, replaced) = state.gate.intercept(pending, active, requested_at);
                if let Some(previous) = replaced {
                    state.conversation.push(
                        Turn::control(
                            scope.name(),
                            format!(
                                "The unconfirmed {} request was discarded in favour of a new one.",
                                previous.action()
                            ),
                        )
                        .with_action(previous.action()),
                    );
                    out.event(TurnEvent::ConfirmationReplaced {
                        previous: previous.token,
                        action: previous.action().to_string(),
                    });
                }
                state
                    .conversation
                    .push(Turn::assistant(scope.name(), &prompt.question).with_action(&action));
                out.say(prompt.question.clone());
                out.event(TurnEvent::ConfirmationRequested {
                    token: prompt.token,
                    action,
                });
                Ok(Flow::Stop)
            }
        }
    }

    fn apply_control(
        &self,
        state: &mut ConversationState,
        control: ControlAction,
        out: &mut TurnOutput,
    ) -> Result<Flow, DispatchError> {
        let name = control.name();
        let from = self.scope_name(state.stack.active_scope())?;
        match control {
            ControlAction::Delegate {
                scope: target,
                context,
                goal,
            } => {
                let before = state.stack.depth();
                match state
                    .stack
                    .delegate(&self.runtime.scopes, &target, &context, goal.as_deref())
                {
                    Ok(id) => {
                        let to = self.scope_name(id)?;
                        let mut note = if state.stack.depth() > before {
                            format!("Control passed from {from} to {to}.")
                        } else {
                            format!("Context updated for {to}.")
                        };
                        if let Some(goal) = goal {
                            note.push_str(&format!(" Goal: {goal}"));
                        }
                        state.conversation.push(Turn::control(&to, note).with_action(name));
                        tracing::info!(conversation = %state.id, from = %from, to = %to, depth = state.stack.depth(), "delegated");
                        out.event(TurnEvent::Delegated { from, to });
                        Ok(Flow::Continue)
                    }
                    Err(e) => self.recover(state, e, out),
                }
            }
            ControlAction::Complete { summary } => match state.stack.complete(summary) {
                Ok(handback) => self.record_handback(state, handback.to, handback.kind, from, out),
                Err(e) => self.recover(state, e, out),
            },
            ControlAction::Escalate { reason } => match state.stack.escalate(reason) {
                Ok(handback) => self.record_handback(state, handback.to, handback.kind, from, out),
                Err(e) => self.recover(state, e, out),
            },
        }
    }

    fn record_handback(
        &self,
        state: &mut ConversationState,
        to_id: ScopeId,
        kind: HandbackKind,
        from: String,
        out: &mut TurnOutput,
    ) -> Result<Flow, DispatchError> {
        let to = self.scope_name(to_id)?;
        let (note, action, event) = match kind {
            HandbackKind::Completed { summary } => (
                format!("The {from} assistant finished: {summary}. Control returned to {to}."),
                crate::actions::control::COMPLETE,
                TurnEvent::Completed {
                    from: from.clone(),
                    to: to.clone(),
                    summary,
                },
            ),
            HandbackKind::Escalated { reason } => (
                format!("The {from} assistant handed back control: {reason}. Control returned to {to}."),
                crate::actions::control::ESCALATE,
                TurnEvent::Escalated {
                    from: from.clone(),
                    to: to.clone(),
                    reason,
                },
            ),
        };
        state.conversation.push(Turn::control(&to, note).with_action(action));
        tracing::info!(conversation = %state.id, from = %from, to = %to, depth = state.stack.depth(), "handed back");
        out.event(event);
        Ok(Flow::Continue)
    }

    fn record_rejection(
        &self,
        state: &mut ConversationState,
        scope: &str,
        result: ActionResult,
        out: &mut TurnOutput,
    ) {
        state
            .conversation
            .push(Turn::action_result(scope, &result.action, result.render()));
        out.say(result.render());
        out.event(TurnEvent::ActionRejected { result });
    }

    async fn resolve_confirmation(
        &self,
        state: &mut ConversationState,
        token: Option<uuid::Uuid>,
        decision: ConfirmationDecision,
        out: &mut TurnOutput,
    ) -> Result<(), DispatchError> {
        let resolution = state
            .gate
            .resume(token, decision, &self.runtime.executor)
            .await;
        let current = self.scope_name(state.stack.active_scope())?;

        match resolution {
            Resolution::Approved { scope, result, .. } => {
                let scope_name = self.scope_name(scope)?;
                state.conversation.push(Turn::action_result(
                    scope_name,
                    &result.action,
                    result.render(),
                ));
                out.say(result.render());
                out.event(TurnEvent::ActionExecuted { result });
            }
            Resolution::Denied {
                token,
                action,
                reason,
            } => {
                let note = match &reason {
                    Some(r) => format!("The user declined {action}: {r}. Nothing was changed."),
                    None => format!("The user declined {action}. Nothing was changed."),
                };
                state
                    .conversation
                    .push(Turn::control(&current, note).with_action(&action));
                out.say(format!("Okay, I won't run {action}. Nothing was changed."));
                out.event(TurnEvent::ConfirmationDenied {
                    token,
                    action,
                    reason,
                });
            }
            Resolution::Modified { previous, prompt } => {
                state
                    .conversation
                    .push(Turn::assistant(&current, &prompt.question).with_action(&prompt.action));
                out.say(prompt.question.clone());
                out.event(TurnEvent::ConfirmationModified {
                    previous,
                    token: prompt.token,
                });
                out.event(TurnEvent::ConfirmationRequested {
                    token: prompt.token,
                    action: prompt.action,
                });
            }
            Resolution::ModifyRejected { result, prompt } => {
                self.record_rejection(state, &current, result, out);
                out.say(prompt.question);
            }
            Resolution::Stale { expected, got } => {
                out.say("That confirmation belongs to an earlier request. The latest request is still waiting for your answer.");
                out.event(TurnEvent::ConfirmationStale { expected, got });
            }
            Resolution::AlreadyResolved { token } => {
                out.say("That request was already handled, so nothing was run again.");
                out.event(TurnEvent::AlreadyResolved { token });
            }
            Resolution::NothingPending => {
                out.say("There is nothing waiting for confirmation.");
                out.event(TurnEvent::NothingPending);
            }
        }
        Ok(())
    }

    fn recover(
        &self,
        state: &mut ConversationState,
        err: DispatchError,
        out: &mut TurnOutput,
    ) -> Result<Flow, DispatchError> {
        let scope_name = self.scope_name(state.stack.active_scope())?;
        match self.runtime.recovery.handle(&err) {
            RecoveryAction::Correction(message) => {
                tracing::debug!(conversation = %state.id, error = %err, "correction");
                state.conversation.push(Turn::control(scope_name, &message));
                out.event(TurnEvent::Correction { message });
                Ok(Flow::Continue)
            }
            RecoveryAction::Report(message) => {
                state.conversation.push(Turn::control(scope_name, &message));
                out.say(message.clone());
                out.event(TurnEvent::NoOp { message });
                Ok(Flow::Stop)
            }
            RecoveryAction::Abort(diag) => Err(DispatchError::InvariantViolated(diag)),
        }
    }

    fn finish(&self, state: &ConversationState, out: TurnOutput) -> Result<OutboundTurn, DispatchError> {
        let active_scope = self.scope_name(state.stack.active_scope())?;
        Ok(OutboundTurn {
            conversation_id: state.id.clone(),
            text: out.lines.join("\n"),
            events: out.events,
            confirmation: state.gate.pending().map(|p| p.prompt()),
            active_scope,
            stack_depth: state.stack.depth(),
        })
    }

    fn scope_name(&self, id: ScopeId) -> Result<String, DispatchError> {
        self.runtime.scopes.get(id).map(|s| s.name().to_string())
    }
}
