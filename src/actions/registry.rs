//! 动作注册表
//!
//! 每个动作由 ActionDescriptor（名称、描述、参数 Schema、读/写分类）与 ActionHandler 组成，
//! 启动时注册、之后只读共享；is_permitted 按作用域的动作集合（加上通用控制标记）做权限判断。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::actions::control;
use crate::actions::schema::ArgSchema;
use crate::actions::FailureKind;
use crate::core::DispatchError;
use crate::scope::Scope;

/// 动作分类：只读动作直接执行，写动作必须经过确认闸门
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    ReadOnly,
    StateMutating,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ArgSchema,
    pub class: ActionClass,
}

impl ActionDescriptor {
    pub fn read_only(name: &str, description: &str, schema: ArgSchema) -> Self {
        Self::new(name, description, schema, ActionClass::ReadOnly)
    }

    pub fn state_mutating(name: &str, description: &str, schema: ArgSchema) -> Self {
        Self::new(name, description, schema, ActionClass::StateMutating)
    }

    fn new(name: &str, description: &str, schema: ArgSchema, class: ActionClass) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            class,
        }
    }

    /// 供 prompt 使用的描述（名称、说明、分类、参数 Schema）
    pub fn to_prompt_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "class": self.class,
            "parameters": self.schema.to_json_schema(),
        })
    }
}

/// 处理函数抛出的领域故障，由执行器转换为结构化失败结果
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ActionFault {
    pub kind: FailureKind,
    pub message: String,
}

impl ActionFault {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExternalUnavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 动作处理函数：只读写外部存储，不触碰委派栈或确认闸门
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value, ActionFault>;
}

/// 用异步闭包实现 ActionHandler
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionFault>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionFault>> + Send,
{
    async fn invoke(&self, args: Value) -> Result<Value, ActionFault> {
        (self.0)(args).await
    }
}

#[derive(Clone)]
pub struct RegisteredAction {
    pub descriptor: Arc<ActionDescriptor>,
    pub handler: Arc<dyn ActionHandler>,
}

impl RegisteredAction {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn class(&self) -> ActionClass {
        self.descriptor.class
    }
}

/// 动作注册表：按名称存储描述符与处理函数
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册动作；重名或占用控制标记名时报错
    pub fn register(
        &mut self,
        descriptor: ActionDescriptor,
        handler: impl ActionHandler + 'static,
    ) -> Result<(), DispatchError> {
        let name = descriptor.name.clone();
        if control::is_control(&name) || self.actions.contains_key(&name) {
            return Err(DispatchError::DuplicateAction(name));
        }
        self.actions.insert(
            name,
            RegisteredAction {
                descriptor: Arc::new(descriptor),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredAction, DispatchError> {
        self.actions
            .get(name)
            .ok_or_else(|| DispatchError::UnknownAction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// 作用域只能调用其声明的动作，外加通用控制标记
    pub fn is_permitted(&self, scope: &Scope, name: &str) -> bool {
        control::is_control(name) || scope.permits(name)
    }

    /// 当前作用域可用动作的 prompt 描述（按名称排序）
    pub fn describe_for(&self, scope: &Scope) -> Vec<Value> {
        let mut described: Vec<Value> = scope
            .actions()
            .filter_map(|name| self.actions.get(name))
            .map(|a| a.descriptor.to_prompt_json())
            .collect();
        described.extend(control::describe(!scope.is_primary()));
        described
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
