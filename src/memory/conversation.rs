//! 对话记录：只追加的轮次序列
//!
//! 由 Dispatcher 独占持有；轮次写入后不可修改、不可删除，供推理适配器与前端渲染使用。

use serde::{Deserialize, Serialize};

/// 轮次角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// 动作执行结果（成功载荷或结构化失败）
    ActionResult,
    /// 控制记录：委派、交还、拒绝、纠正提示
    Control,
}

/// 单个轮次
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// 写入时的激活作用域
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Turn {
    pub fn user(scope: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::User, scope, content)
    }

    pub fn assistant(scope: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, scope, content)
    }

    pub fn control(scope: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Control, scope, content)
    }

    pub fn action_result(
        scope: impl Into<String>,
        action: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::new(Role::ActionResult, scope, content)
        }
    }

    /// 标注产生该轮次的动作或控制标记
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    fn new(role: Role, scope: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            scope: scope.into(),
            action: None,
        }
    }
}

/// 对话：只提供追加与只读访问
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个轮次，返回其下标
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// 最近一条用户轮次
    pub fn last_user(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::User)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
