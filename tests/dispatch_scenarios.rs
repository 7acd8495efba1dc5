//! 调度场景集成测试：脚本化适配器 + 内存旅行数据库

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;

use tripdesk::actions::{ActionClass, FailureKind};
use tripdesk::config::AppConfig;
use tripdesk::core::{
    ConversationManager, ConversationState, DispatchError, Dispatcher, GatePhase, InboundTurn,
    OutboundTurn, RuntimeBuilder, TurnEvent,
};
use tripdesk::memory::Role;
use tripdesk::reasoning::{
    ConversationView, Decision, ReasoningAdapter, ReasoningError, ScriptedAdapter,
};
use tripdesk::scope::Scope;
use tripdesk::travel::scopes::{HOTEL, PRIMARY, SCOPES};
use tripdesk::travel::{build_runtime, register_actions, TravelStore};

struct Harness {
    dispatcher: Dispatcher,
    store: TravelStore,
    adapters: HashMap<&'static str, Arc<ScriptedAdapter>>,
}

impl Harness {
    fn new() -> Self {
        let store = TravelStore::in_memory().unwrap();
        let adapters: HashMap<&'static str, Arc<ScriptedAdapter>> = SCOPES
            .iter()
            .map(|s| (s.name, ScriptedAdapter::shared()))
            .collect();
        let (primary, rest) = SCOPES.split_first().unwrap();
        let mut builder = RuntimeBuilder::new(
            AppConfig::default(),
            primary.build(adapters[primary.name].clone()),
        );
        register_actions(builder.registry_mut(), &store).unwrap();
        for spec in rest {
            builder = builder.scope(spec.build(adapters[spec.name].clone())).unwrap();
        }
        let dispatcher = Dispatcher::new(Arc::new(builder.build().unwrap()));
        Self {
            dispatcher,
            store,
            adapters,
        }
    }

    fn script(&self, scope: &str, decisions: impl IntoIterator<Item = Decision>) {
        for d in decisions {
            self.adapters[scope].push(d);
        }
    }

    fn adapter(&self, scope: &str) -> &ScriptedAdapter {
        &self.adapters[scope]
    }

    async fn say(&self, state: &mut ConversationState, text: &str) -> OutboundTurn {
        self.dispatcher
            .handle_turn(state, InboundTurn::message(text))
            .await
            .unwrap()
    }

    async fn send(&self, state: &mut ConversationState, inbound: InboundTurn) -> OutboundTurn {
        self.dispatcher.handle_turn(state, inbound).await.unwrap()
    }
}

fn to_hotel() -> Decision {
    Decision::propose(
        "delegate",
        json!({"scope": "hotel", "context": {"location": "Zurich"}, "goal": "book a stay"}),
    )
}

fn book_hilton(checkin: &str, checkout: &str) -> Decision {
    Decision::propose(
        "book_hotel",
        json!({"hotel_id": 8, "checkin_date": checkin, "checkout_date": checkout}),
    )
}

fn executed(out: &OutboundTurn) -> Vec<&tripdesk::actions::ActionResult> {
    out.events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ActionExecuted { result } => Some(result),
            _ => None,
        })
        .collect()
}

fn requested_token(out: &OutboundTurn) -> uuid::Uuid {
    out.confirmation.as_ref().map(|p| p.token).unwrap()
}

#[tokio::test]
async fn test_read_only_search_runs_without_confirmation() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(
        HOTEL,
        [
            Decision::propose("search_hotels", json!({"location": "Zurich"})),
            Decision::respond("Three hotels in Zurich."),
        ],
    );
    let mut state = h.dispatcher.new_conversation("a");

    let out = h.say(&mut state, "search hotels in Zurich").await;

    assert_eq!(
        out.events[0],
        TurnEvent::Delegated {
            from: "primary".into(),
            to: "hotel".into()
        }
    );
    let results = executed(&out);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].class, ActionClass::ReadOnly);
    assert_eq!(results[0].payload().and_then(|p| p.as_array()).map(Vec::len), Some(3));
    assert!(out.confirmation.is_none());
    assert_eq!(state.gate.phase(), GatePhase::Idle);
    assert_eq!(out.active_scope, "hotel");
    assert_eq!(out.stack_depth, 2);
    assert_eq!(out.text, "Three hotels in Zurich.");
    assert_eq!(h.store.mutation_count(), 0);

    let first = &h.adapter(HOTEL).seen()[0];
    assert_eq!(first.working_memory.get("location"), Some(&json!("Zurich")));
    assert!(first.permitted.contains(&"search_hotels".to_string()));
    assert!(first.permitted.contains(&"complete".to_string()));
    assert!(!first.permitted.contains(&"cancel_ticket".to_string()));
}

#[tokio::test]
async fn test_booking_waits_for_confirmation_then_executes_once() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(HOTEL, [book_hilton("2025-03-03", "2025-03-05")]);
    let mut state = h.dispatcher.new_conversation("b");

    let out = h.say(&mut state, "book the Hilton for March 3-5").await;
    let prompt = out.confirmation.clone().unwrap();
    assert_eq!(prompt.action, "book_hotel");
    assert_eq!(state.gate.phase(), GatePhase::AwaitingConfirmation);
    assert!(executed(&out).is_empty());
    assert_eq!(h.store.mutation_count(), 0);

    let out = h.say(&mut state, "yes").await;
    let results = executed(&out);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].payload().unwrap()["status"], "booked");
    assert_eq!(state.gate.phase(), GatePhase::Idle);
    assert!(out.confirmation.is_none());
    assert_eq!(h.store.mutation_count(), 1);

    // 同一 token 再次批准不会重复执行
    let again = h.send(&mut state, InboundTurn::approve(Some(prompt.token))).await;
    assert_eq!(again.events, vec![TurnEvent::AlreadyResolved { token: prompt.token }]);
    assert_eq!(h.store.mutation_count(), 1);
}

#[tokio::test]
async fn test_two_intents_ask_for_clarification() {
    let h = Harness::new();
    h.script(
        PRIMARY,
        [Decision::Ambiguous {
            question: "Hotel or car first?".into(),
            intents: vec!["hotels".into(), "car rentals".into()],
        }],
    );
    let mut state = h.dispatcher.new_conversation("c");

    let out = h.say(&mut state, "book a hotel and rent a car").await;

    assert!(matches!(&out.events[..], [TurnEvent::Clarification { intents, .. }] if intents.len() == 2));
    assert_eq!(out.text, "Hotel or car first?");
    assert_eq!(out.stack_depth, 1);
    assert_eq!(state.stack.depth(), 1);
}

#[tokio::test]
async fn test_escalation_reason_reaches_primary() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel(), Decision::respond("Let's look at your flight.")]);
    h.script(
        HOTEL,
        [Decision::propose("escalate", json!({"reason": "need flight change instead"}))],
    );
    let mut state = h.dispatcher.new_conversation("d");

    let out = h.say(&mut state, "I want to change my hotel").await;

    assert!(out.events.contains(&TurnEvent::Escalated {
        from: "hotel".into(),
        to: "primary".into(),
        reason: "need flight change instead".into(),
    }));
    assert_eq!(out.stack_depth, 1);
    assert_eq!(out.active_scope, "primary");

    let seen = h.adapter(PRIMARY).seen();
    let last = seen[1].turns.last().unwrap();
    assert_eq!(last.role, Role::Control);
    assert_eq!(last.action.as_deref(), Some("escalate"));
    assert!(last.content.contains("need flight change instead"));
}

#[tokio::test]
async fn test_invalid_dates_are_rejected_before_the_gate() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(HOTEL, [book_hilton("2025-03-05", "2025-03-03")]);
    let mut state = h.dispatcher.new_conversation("e");

    let out = h.say(&mut state, "book the Hilton from the 5th to the 3rd").await;

    let rejected: Vec<_> = out
        .events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ActionRejected { result } => result.failure_info(),
            _ => None,
        })
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].kind, FailureKind::Validation);
    assert!(out.confirmation.is_none());
    assert_eq!(state.gate.phase(), GatePhase::Idle);
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_deny_leaves_store_untouched() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(HOTEL, [book_hilton("2025-03-03", "2025-03-05")]);
    let mut state = h.dispatcher.new_conversation("deny");

    let token = requested_token(&h.say(&mut state, "book the Hilton").await);
    let out = h
        .send(&mut state, InboundTurn::deny(Some(token), Some("too expensive")))
        .await;

    assert!(matches!(
        &out.events[..],
        [TurnEvent::ConfirmationDenied { reason: Some(r), .. }] if r == "too expensive"
    ));
    assert_eq!(state.gate.phase(), GatePhase::Idle);

    let late = h.send(&mut state, InboundTurn::approve(Some(token))).await;
    assert_eq!(late.events, vec![TurnEvent::AlreadyResolved { token }]);
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_modify_reissues_token_and_runs_new_arguments() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(HOTEL, [book_hilton("2025-03-03", "2025-03-05")]);
    let mut state = h.dispatcher.new_conversation("modify");

    let first = requested_token(&h.say(&mut state, "book the Hilton").await);
    let out = h
        .send(
            &mut state,
            InboundTurn::modify(Some(first), json!({"checkout_date": "2025-03-06"})),
        )
        .await;
    let second = requested_token(&out);
    assert_ne!(first, second);
    assert_eq!(out.confirmation.as_ref().unwrap().args["checkout_date"], "2025-03-06");

    let stale = h.send(&mut state, InboundTurn::approve(Some(first))).await;
    assert!(matches!(&stale.events[..], [TurnEvent::ConfirmationStale { .. }]));
    assert_eq!(h.store.mutation_count(), 0);

    let done = h.send(&mut state, InboundTurn::approve(Some(second))).await;
    assert_eq!(executed(&done)[0].payload().unwrap()["checkout_date"], "2025-03-06");
    assert_eq!(h.store.mutation_count(), 1);
}

#[tokio::test]
async fn test_action_outside_scope_is_corrected_not_executed() {
    let h = Harness::new();
    h.script(
        PRIMARY,
        [
            book_hilton("2025-03-03", "2025-03-05"),
            Decision::propose("teleport", json!({})),
            Decision::respond("Let me hand you to the hotel desk."),
        ],
    );
    let mut state = h.dispatcher.new_conversation("perm");

    let out = h.say(&mut state, "book the Hilton").await;

    let corrections = out
        .events
        .iter()
        .filter(|e| matches!(e, TurnEvent::Correction { .. }))
        .count();
    assert_eq!(corrections, 2);
    assert!(out.confirmation.is_none());
    assert_eq!(out.text, "Let me hand you to the hotel desk.");
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_message_while_awaiting_declines_pending_proposal() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    h.script(
        HOTEL,
        [
            book_hilton("2025-03-03", "2025-03-05"),
            Decision::propose("book_hotel", json!({"hotel_id": 7, "checkin_date": "2025-03-03", "checkout_date": "2025-03-04"})),
        ],
    );
    let mut state = h.dispatcher.new_conversation("replace");

    let first = requested_token(&h.say(&mut state, "book the Hilton").await);
    // 等待确认时发来的普通消息按拒绝处理，理由即原文
    let out = h.say(&mut state, "actually, the Sheraton").await;
    assert!(matches!(
        &out.events[..],
        [TurnEvent::ConfirmationDenied { token, reason: Some(r), .. }] if *token == first && r == "actually, the Sheraton"
    ));
    assert_eq!(h.store.mutation_count(), 0);

    let out = h.say(&mut state, "book the Sheraton").await;
    let second = requested_token(&out);
    assert_ne!(first, second);
    assert_eq!(out.confirmation.unwrap().args["hotel_id"], 7);
}

#[tokio::test]
async fn test_step_budget_ends_the_turn() {
    let h = Harness::new();
    h.script(
        PRIMARY,
        std::iter::repeat_with(|| {
            Decision::propose("fetch_user_flight_information", json!({"passenger_id": "3442 587242"}))
        })
        .take(10),
    );
    let mut state = h.dispatcher.new_conversation("budget");

    let out = h.say(&mut state, "what are my flights?").await;

    assert_eq!(out.events.last(), Some(&TurnEvent::StepLimitReached { limit: 6 }));
    assert_eq!(executed(&out).len(), 6);
    assert_eq!(h.adapter(PRIMARY).remaining(), 4);
}

#[tokio::test]
async fn test_reasoning_failure_is_reported() {
    let h = Harness::new();
    h.adapter(PRIMARY)
        .push_error(ReasoningError::Unavailable("connection refused".into()));
    let mut state = h.dispatcher.new_conversation("down");

    let out = h.say(&mut state, "hello").await;

    assert!(matches!(&out.events[..], [TurnEvent::ReasoningUnavailable { .. }]));
    assert!(out.text.contains("nothing was changed"));
    assert!(state.aborted.is_none());
}

#[tokio::test]
async fn test_complete_in_primary_is_a_no_op() {
    let h = Harness::new();
    h.script(PRIMARY, [Decision::propose("complete", json!({"summary": "all done"}))]);
    let mut state = h.dispatcher.new_conversation("noop");

    let out = h.say(&mut state, "thanks").await;

    assert!(matches!(&out.events[..], [TurnEvent::NoOp { .. }]));
    assert_eq!(out.stack_depth, 1);
}

#[tokio::test]
async fn test_broken_bookkeeping_aborts_conversation() {
    let h = Harness::new();
    h.script(PRIMARY, [to_hotel()]);
    let mut state = h.dispatcher.new_conversation("abort");
    h.say(&mut state, "hotels please").await;
    assert_eq!(state.stack.depth(), 2);

    // 只有主作用域的运行时找不到栈顶的 hotel 作用域
    let bare = RuntimeBuilder::new(
        AppConfig::default(),
        Scope::new("primary", "bare", ScriptedAdapter::shared()),
    )
    .build()
    .unwrap();
    let other = Dispatcher::new(Arc::new(bare));

    let err = other
        .handle_turn(&mut state, InboundTurn::message("hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ConversationAborted(_)));
    assert!(state.aborted.is_some());

    let again = h
        .dispatcher
        .handle_turn(&mut state, InboundTurn::message("anyone?"))
        .await
        .unwrap_err();
    assert!(matches!(again, DispatchError::ConversationAborted(_)));
}

fn rules_runtime() -> (Dispatcher, TravelStore) {
    let mut config = AppConfig::default();
    config.llm.provider = "rules".to_string();
    let store = TravelStore::in_memory().unwrap();
    let runtime = build_runtime(config, &store).unwrap();
    (Dispatcher::new(Arc::new(runtime)), store)
}

#[tokio::test]
async fn test_offline_rules_book_a_hotel_end_to_end() {
    let (dispatcher, store) = rules_runtime();
    let manager = ConversationManager::new(dispatcher);
    let id = manager.start().await;

    let out = manager
        .handle(&id, InboundTurn::message("search hotels in Zurich"))
        .await
        .unwrap();
    assert_eq!(out.active_scope, "hotel");
    assert!(out.text.starts_with("search_hotels succeeded"));

    let out = manager
        .handle(&id, InboundTurn::message("book hotel 8 from 2025-03-03 to 2025-03-05"))
        .await
        .unwrap();
    assert!(out.confirmation.is_some());

    let out = manager.handle(&id, InboundTurn::message("yes")).await.unwrap();
    assert!(out.text.contains("\"booked\""));
    assert_eq!(store.mutation_count(), 1);

    let snapshot = manager.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.stack, vec!["primary".to_string(), "hotel".to_string()]);
    assert_eq!(snapshot.gate, GatePhase::Idle);
}

#[tokio::test]
async fn test_conversations_run_concurrently_and_independently() {
    let (dispatcher, store) = rules_runtime();
    let manager = Arc::new(ConversationManager::new(dispatcher));

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(manager.start().await);
    }
    let outs = join_all(ids.iter().map(|id| {
        let manager = manager.clone();
        let id = id.clone();
        async move {
            manager
                .handle(&id, InboundTurn::message("search hotels in Zurich"))
                .await
        }
    }))
    .await;

    for (out, id) in outs.into_iter().zip(&ids) {
        let out = out.unwrap();
        assert_eq!(&out.conversation_id, id);
        assert_eq!(out.stack_depth, 2);
        assert_eq!(executed(&out).len(), 1);
    }
    assert_eq!(manager.len().await, 8);
    assert_eq!(store.mutation_count(), 0);

    assert!(manager.end(&ids[0]).await);
    let gone = manager.handle(&ids[0], InboundTurn::message("hi")).await;
    assert!(matches!(gone, Err(DispatchError::UnknownConversation(_))));
}

/// 记录同时在途的推理调用数；每次调用都会停顿一会儿
#[derive(Default)]
struct SlowAdapter {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait::async_trait]
impl ReasoningAdapter for SlowAdapter {
    async fn propose(&self, view: &ConversationView<'_>) -> Result<Decision, ReasoningError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let last = view.turns.last().map(|t| t.content.clone()).unwrap_or_default();
        Ok(Decision::respond(format!("noted: {last}")))
    }
}

#[tokio::test]
async fn test_turns_of_one_conversation_are_serialized() {
    let adapter = Arc::new(SlowAdapter::default());
    let runtime = RuntimeBuilder::new(
        AppConfig::default(),
        Scope::new("primary", "slow", adapter.clone()),
    )
    .build()
    .unwrap();
    let manager = Arc::new(ConversationManager::new(Dispatcher::new(Arc::new(runtime))));
    let id = manager.start().await;

    let outs = join_all(["first", "second"].into_iter().map(|text| {
        let manager = manager.clone();
        let id = id.clone();
        async move { manager.handle(&id, InboundTurn::message(text)).await }
    }))
    .await;

    let texts: Vec<String> = outs.into_iter().map(|o| o.unwrap().text).collect();
    assert_eq!(texts, vec!["noted: first".to_string(), "noted: second".to_string()]);
    assert_eq!(adapter.peak.load(Ordering::SeqCst), 1);

    let conversation = manager.open(&id).await;
    let state = conversation.lock().await;
    let user_turns: Vec<&str> = state
        .conversation
        .turns()
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .collect();
    assert_eq!(user_turns, vec!["first", "second"]);
}
