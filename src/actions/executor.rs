//! 动作执行器
//!
//! prepare 先按 Schema 校验参数并分流：只读调用可立即执行，写调用成为待确认调用。
//! 写调用只能以 ApprovedInvocation 的形式执行，而 ApprovedInvocation 只由确认闸门构造。
//! 执行时在独立任务中调用处理函数并施加超时；故障、超时、panic 一律转为结构化失败结果，
//! 每次调用输出结构化审计日志（JSON）。
//! 写调用超时后不中止任务，而是等待其真实结果：存储层在截止时间之后拒绝提交并回滚。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinError;
use tokio::time::timeout;

use crate::actions::schema::ValidationError;
use crate::actions::{ActionClass, ActionFault, ActionResult, FailureKind, RegisteredAction};

tokio::task_local! {
    /// 当前写调用的截止时间，由执行器在调用写处理函数时设置
    static WRITE_DEADLINE: Instant;
}

/// 当前任务所属写调用的截止时间；不在写调用中时为 None
pub fn write_deadline() -> Option<Instant> {
    WRITE_DEADLINE.try_with(|d| *d).ok()
}

/// 已绑定且校验过参数的调用
#[derive(Clone)]
pub struct Invocation {
    action: RegisteredAction,
    args: Value,
}

impl Invocation {
    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn class(&self) -> ActionClass {
        self.action.class()
    }
}

pub struct ReadOnlyInvocation(Invocation);

impl ReadOnlyInvocation {
    pub fn name(&self) -> &str {
        self.0.name()
    }
}

/// 等待确认的写调用
#[derive(Clone)]
pub struct PendingInvocation(Invocation);

impl PendingInvocation {
    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn args(&self) -> &Value {
        self.0.args()
    }

    /// 以新参数重新绑定（确认阶段的 modify），校验失败时原调用不变
    pub fn rebind(&self, args: Value) -> Result<PendingInvocation, ValidationError> {
        self.0.action.descriptor.schema.validate(&args)?;
        Ok(PendingInvocation(Invocation {
            action: self.0.action.clone(),
            args,
        }))
    }
}

/// 已获用户明确批准的写调用
pub struct ApprovedInvocation(Invocation);

impl ApprovedInvocation {
    pub(crate) fn approve(pending: PendingInvocation) -> Self {
        Self(pending.0)
    }
}

pub enum Prepared {
    ReadOnly(ReadOnlyInvocation),
    NeedsConfirmation(PendingInvocation),
}

/// 动作执行器：校验、超时、故障隔离与审计
pub struct ActionExecutor {
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_timeout(Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 校验参数并按分类分流；校验失败直接返回 validation 失败结果，处理函数不会被调用
    pub fn prepare(&self, action: &RegisteredAction, args: Value) -> Result<Prepared, ActionResult> {
        let descriptor = &action.descriptor;
        if let Err(e) = descriptor.schema.validate(&args) {
            tracing::warn!(action = %descriptor.name, error = %e, "argument validation failed");
            return Err(ActionResult::from_validation(&descriptor.name, descriptor.class, &e));
        }
        let invocation = Invocation {
            action: action.clone(),
            args,
        };
        Ok(match descriptor.class {
            ActionClass::ReadOnly => Prepared::ReadOnly(ReadOnlyInvocation(invocation)),
            ActionClass::StateMutating => {
                Prepared::NeedsConfirmation(PendingInvocation(invocation))
            }
        })
    }

    pub async fn execute_read_only(&self, invocation: ReadOnlyInvocation) -> ActionResult {
        self.run(invocation.0).await
    }

    pub async fn execute_approved(&self, invocation: ApprovedInvocation) -> ActionResult {
        self.run(invocation.0).await
    }

    async fn run(&self, invocation: Invocation) -> ActionResult {
        let Invocation { action, args } = invocation;
        let name = action.name().to_string();
        let class = action.class();

        if let Err(e) = action.descriptor.schema.validate(&args) {
            return ActionResult::from_validation(name, class, &e);
        }

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let handler = action.handler.clone();
        let mut task = match class {
            ActionClass::ReadOnly => tokio::spawn(async move { handler.invoke(args).await }),
            ActionClass::StateMutating => tokio::spawn(
                WRITE_DEADLINE.scope(start + self.timeout, async move { handler.invoke(args).await }),
            ),
        };

        let result = match timeout(self.timeout, &mut task).await {
            Ok(joined) => joined_result(&name, class, joined),
            Err(_) if class == ActionClass::StateMutating => {
                tracing::warn!(action = %name, "state-mutating action exceeded its timeout; waiting for its outcome");
                joined_result(&name, class, task.await)
            }
            Err(_) => {
                task.abort();
                ActionResult::failure(
                    &name,
                    class,
                    FailureKind::ExternalUnavailable,
                    format!("timed out after {}s", self.timeout.as_secs_f32()),
                    None,
                )
            }
        };

        let outcome = match result.failure_info() {
            None => "ok".to_string(),
            Some(f) => f.kind.to_string(),
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "action": name,
            "class": class,
            "ok": result.is_success(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        result
    }
}

fn joined_result(
    name: &str,
    class: ActionClass,
    joined: Result<Result<Value, ActionFault>, JoinError>,
) -> ActionResult {
    match joined {
        Ok(Ok(payload)) => ActionResult::success(name, class, payload),
        Ok(Err(fault)) => ActionResult::failure(name, class, fault.kind, fault.message, None),
        Err(join_err) => {
            tracing::error!(action = %name, error = %join_err, "action handler crashed");
            ActionResult::failure(
                name,
                class,
                FailureKind::ExternalUnavailable,
                "the action handler crashed",
                None,
            )
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::actions::schema::{ArgKind, ArgSchema};
    use crate::actions::{handler_fn, ActionDescriptor, ActionFault, ActionRegistry};

    fn registry(calls: Arc<AtomicUsize>) -> ActionRegistry {
        let mut r = ActionRegistry::new();
        let c = calls.clone();
        r.register(
            ActionDescriptor::read_only(
                "search_hotels",
                "search",
                ArgSchema::new().required("location", ArgKind::String, ""),
            ),
            handler_fn(move |args: Value| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([{"name": "Hilton", "location": args["location"]}]))
                }
            }),
        )
        .unwrap();
        let c = calls.clone();
        r.register(
            ActionDescriptor::state_mutating(
                "book_hotel",
                "book",
                ArgSchema::new()
                    .required("hotel_id", ArgKind::Integer, "")
                    .required("checkin_date", ArgKind::Date, "")
                    .required("checkout_date", ArgKind::Date, "")
                    .date_order("checkin_date", "checkout_date"),
            ),
            handler_fn(move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("booked"))
                }
            }),
        )
        .unwrap();
        r.register(
            ActionDescriptor::read_only("flaky", "always fails", ArgSchema::new()),
            handler_fn(|_| async { Err(ActionFault::unavailable("database offline")) }),
        )
        .unwrap();
        r.register(
            ActionDescriptor::read_only("slow", "never returns in time", ArgSchema::new()),
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }),
        )
        .unwrap();
        r.register(
            ActionDescriptor::read_only("crashy", "panics", ArgSchema::new()),
            handler_fn(|_| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            }),
        )
        .unwrap();
        r
    }

    #[tokio::test]
    async fn test_read_only_executes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls.clone());
        let exec = ActionExecutor::new(5);
        let prepared = exec
            .prepare(r.resolve("search_hotels").unwrap(), json!({"location": "Zurich"}))
            .ok()
            .unwrap();
        let Prepared::ReadOnly(inv) = prepared else {
            panic!("expected read-only");
        };
        let result = exec.execute_read_only(inv).await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutating_needs_confirmation_and_does_not_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls.clone());
        let exec = ActionExecutor::new(5);
        let prepared = exec
            .prepare(
                r.resolve("book_hotel").unwrap(),
                json!({"hotel_id": 1, "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"}),
            )
            .ok()
            .unwrap();
        let Prepared::NeedsConfirmation(pending) = prepared else {
            panic!("expected confirmation");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = exec.execute_approved(ApprovedInvocation::approve(pending)).await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_never_invokes_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls.clone());
        let exec = ActionExecutor::new(5);
        let result = exec
            .prepare(
                r.resolve("book_hotel").unwrap(),
                json!({"hotel_id": 1, "checkin_date": "2025-03-05", "checkout_date": "2025-03-03"}),
            )
            .err()
            .unwrap();
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.argument.as_deref(), Some("checkout_date"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rebind_validates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry(calls);
        let exec = ActionExecutor::new(5);
        let Ok(Prepared::NeedsConfirmation(pending)) = exec.prepare(
            r.resolve("book_hotel").unwrap(),
            json!({"hotel_id": 1, "checkin_date": "2025-03-03", "checkout_date": "2025-03-05"}),
        ) else {
            panic!("expected confirmation");
        };
        assert!(pending
            .rebind(json!({"hotel_id": 1, "checkin_date": "2025-03-09", "checkout_date": "2025-03-05"}))
            .is_err());
        let rebound = pending
            .rebind(json!({"hotel_id": 2, "checkin_date": "2025-03-03", "checkout_date": "2025-03-06"}))
            .unwrap();
        assert_eq!(rebound.args()["hotel_id"], 2);
    }

    #[tokio::test]
    async fn test_handler_fault_becomes_failure() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let exec = ActionExecutor::new(5);
        let Ok(Prepared::ReadOnly(inv)) = exec.prepare(r.resolve("flaky").unwrap(), json!({})) else {
            panic!("expected read-only");
        };
        let result = exec.execute_read_only(inv).await;
        assert_eq!(
            result.failure_info().map(|f| f.kind),
            Some(FailureKind::ExternalUnavailable)
        );
    }

    #[tokio::test]
    async fn test_timeout_becomes_external_unavailable() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let exec = ActionExecutor::with_timeout(Duration::from_millis(50));
        let Ok(Prepared::ReadOnly(inv)) = exec.prepare(r.resolve("slow").unwrap(), json!({})) else {
            panic!("expected read-only");
        };
        let result = exec.execute_read_only(inv).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalUnavailable);
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let r = registry(Arc::new(AtomicUsize::new(0)));
        let exec = ActionExecutor::new(5);
        let Ok(Prepared::ReadOnly(inv)) = exec.prepare(r.resolve("crashy").unwrap(), json!({})) else {
            panic!("expected read-only");
        };
        let result = exec.execute_read_only(inv).await;
        assert_eq!(
            result.failure_info().map(|f| f.kind),
            Some(FailureKind::ExternalUnavailable)
        );
    }

    #[tokio::test]
    async fn test_late_write_is_rolled_back_after_timeout() {
        use crate::travel::store::db_fault;
        use crate::travel::TravelStore;

        let store = TravelStore::in_memory().unwrap();
        let mut r = ActionRegistry::new();
        let s = store.clone();
        r.register(
            ActionDescriptor::state_mutating(
                "add_event",
                "add a calendar entry",
                ArgSchema::new().required("title", ArgKind::String, ""),
            ),
            handler_fn(move |args: Value| {
                let s = s.clone();
                async move {
                    let title = args["title"].as_str().unwrap_or_default().to_string();
                    s.write(move |tx| {
                        std::thread::sleep(Duration::from_millis(200));
                        tx.execute(
                            "INSERT INTO calendar_events (title, date) VALUES (?1, '2025-03-04')",
                            [title],
                        )
                        .map_err(db_fault)
                    })
                    .await?;
                    Ok::<Value, ActionFault>(json!("added"))
                }
            }),
        )
        .unwrap();

        let exec = ActionExecutor::with_timeout(Duration::from_millis(50));
        let Ok(Prepared::NeedsConfirmation(pending)) =
            exec.prepare(r.resolve("add_event").unwrap(), json!({"title": "Museum"}))
        else {
            panic!("expected confirmation");
        };
        let result = exec.execute_approved(ApprovedInvocation::approve(pending)).await;

        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalUnavailable);
        assert!(failure.message.contains("rolled back"));
        assert!(failure.hint.contains("No reservation was changed"));
        assert_eq!(store.mutation_count(), 0);
        let rows: i64 = store
            .read(|c| {
                c.query_row("SELECT COUNT(*) FROM calendar_events", [], |r| r.get(0))
                    .map_err(db_fault)
            })
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_slow_mutating_handler_reports_real_outcome() {
        let mut r = ActionRegistry::new();
        r.register(
            ActionDescriptor::state_mutating("slow_write", "finishes late", ArgSchema::new()),
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok(json!("done"))
            }),
        )
        .unwrap();
        let exec = ActionExecutor::with_timeout(Duration::from_millis(30));
        let Ok(Prepared::NeedsConfirmation(pending)) =
            exec.prepare(r.resolve("slow_write").unwrap(), json!({}))
        else {
            panic!("expected confirmation");
        };
        let result = exec.execute_approved(ApprovedInvocation::approve(pending)).await;
        assert!(result.is_success());
    }
}
