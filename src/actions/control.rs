//! 通用控制标记：delegate / complete / escalate
//!
//! 任何作用域都可以提出这三个动作；它们不经过执行器，而是由 Dispatcher 转为委派栈操作。

use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use crate::actions::schema::{ArgKind, ArgSchema, ValidationError};

pub const DELEGATE: &str = "delegate";
pub const COMPLETE: &str = "complete";
pub const ESCALATE: &str = "escalate";

pub fn is_control(name: &str) -> bool {
    matches!(name, DELEGATE | COMPLETE | ESCALATE)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    /// 将控制权交给目标作用域，并携带已解析的上下文
    Delegate {
        scope: String,
        context: Map<String, Value>,
        goal: Option<String>,
    },
    Complete { summary: String },
    Escalate { reason: String },
}

impl ControlAction {
    /// 非控制标记返回 None；参数不合法返回 Some(Err)
    pub fn parse(name: &str, args: &Value) -> Option<Result<Self, ValidationError>> {
        if !is_control(name) {
            return None;
        }
        Some(Self::parse_inner(name, args))
    }

    fn parse_inner(name: &str, args: &Value) -> Result<Self, ValidationError> {
        schema(name).validate(args)?;
        let text = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        let action = match name {
            DELEGATE => ControlAction::Delegate {
                scope: text("scope").unwrap_or_default(),
                context: args
                    .get("context")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                goal: text("goal"),
            },
            COMPLETE => ControlAction::Complete {
                summary: text("summary").unwrap_or_else(|| "task completed".to_string()),
            },
            _ => ControlAction::Escalate {
                reason: text("reason").unwrap_or_default(),
            },
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::Delegate { .. } => DELEGATE,
            ControlAction::Complete { .. } => COMPLETE,
            ControlAction::Escalate { .. } => ESCALATE,
        }
    }
}

/// 三个控制标记的参数 Schema，进程内只构建一次
fn schema(name: &str) -> &'static ArgSchema {
    static SCHEMAS: OnceLock<[ArgSchema; 3]> = OnceLock::new();
    let [delegate, complete, escalate] = SCHEMAS.get_or_init(|| {
        [
            ArgSchema::new()
                .required("scope", ArgKind::String, "name of the assistant to hand the conversation to")
                .optional("context", ArgKind::Object, "identifiers already known, e.g. passenger_id, location, dates")
                .optional("goal", ArgKind::String, "what the user wants done"),
            ArgSchema::new().optional("summary", ArgKind::String, "what was accomplished"),
            ArgSchema::new().required(
                "reason",
                ArgKind::String,
                "why control goes back to the previous assistant",
            ),
        ]
    });
    match name {
        DELEGATE => delegate,
        COMPLETE => complete,
        _ => escalate,
    }
}

/// 控制标记的 prompt 描述；主作用域无法交还控制权，只列出 delegate
pub fn describe(can_hand_back: bool) -> Vec<Value> {
    let mut out = vec![json!({
        "name": DELEGATE,
        "description": "Hand the conversation to a specialized assistant.",
        "class": "control",
        "parameters": schema(DELEGATE).to_json_schema(),
    })];
    if can_hand_back {
        out.push(json!({
            "name": COMPLETE,
            "description": "The task is done; return control to the previous assistant.",
            "class": "control",
            "parameters": schema(COMPLETE).to_json_schema(),
        }));
        out.push(json!({
            "name": ESCALATE,
            "description": "The request is outside this assistant's remit; return control with a reason.",
            "class": "control",
            "parameters": schema(ESCALATE).to_json_schema(),
        }));
    }
    out
}
