//! 委派栈：会话级的控制权转移状态机
//!
//! 栈底恒为主作用域帧，栈顶为当前激活作用域。delegate 压栈并携带上下文；
//! complete / escalate 弹栈，把控制权交还给上一层（而不是无条件回到主作用域）。
//! 主作用域帧单独存放，因此栈在结构上不可能为空。

use serde_json::{Map, Value};

use crate::core::DispatchError;
use crate::memory::WorkingMemory;
use crate::scope::{ScopeId, ScopeTable};

pub const DEFAULT_MAX_DEPTH: usize = 8;
pub const DEFAULT_MAX_CARRY_FIELDS: usize = 8;

#[derive(Debug, Clone)]
pub struct Frame {
    pub scope: ScopeId,
    pub memory: WorkingMemory,
}

impl Frame {
    fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            memory: WorkingMemory::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandbackKind {
    Completed { summary: String },
    Escalated { reason: String },
}

/// 弹栈结果：控制权从 from 交还给 to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handback {
    pub from: ScopeId,
    pub to: ScopeId,
    pub kind: HandbackKind,
}

#[derive(Debug, Clone)]
pub struct DelegationStack {
    primary: Frame,
    delegated: Vec<Frame>,
    max_depth: usize,
    max_carry_fields: usize,
}

impl Default for DelegationStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_CARRY_FIELDS)
    }
}

impl DelegationStack {
    pub fn new(max_depth: usize, max_carry_fields: usize) -> Self {
        Self {
            primary: Frame::new(ScopeId::PRIMARY),
            delegated: Vec::new(),
            max_depth: max_depth.max(1),
            max_carry_fields,
        }
    }

    pub fn active(&self) -> &Frame {
        self.delegated.last().unwrap_or(&self.primary)
    }

    pub fn active_mut(&mut self) -> &mut Frame {
        match self.delegated.last_mut() {
            Some(frame) => frame,
            None => &mut self.primary,
        }
    }

    pub fn active_scope(&self) -> ScopeId {
        self.active().scope
    }

    /// 栈深度（含主作用域）
    pub fn depth(&self) -> usize {
        1 + self.delegated.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::once(&self.primary).chain(self.delegated.iter())
    }

    /// 从栈底到栈顶的作用域名
    pub fn path(&self, table: &ScopeTable) -> Result<Vec<String>, DispatchError> {
        self.frames()
            .map(|f| table.get(f.scope).map(|s| s.name().to_string()))
            .collect()
    }

    /// 委派给目标作用域。目标已是激活作用域时不压栈，只合并上下文。
    pub fn delegate(
        &mut self,
        table: &ScopeTable,
        target: &str,
        carry: &Map<String, Value>,
        goal: Option<&str>,
    ) -> Result<ScopeId, DispatchError> {
        let id = table.lookup(target)?;
        let scope = table.get(id)?;

        if id == self.active_scope() {
            let max = self.max_carry_fields;
            let frame = self.active_mut();
            frame.memory.carry(carry, scope.carry_keys(), max);
            if let Some(goal) = goal {
                frame.memory.set_goal(goal);
            }
            return Ok(id);
        }
        if id == ScopeId::PRIMARY {
            let active = table.get(self.active_scope())?;
            return Err(DispatchError::ActionNotPermittedForScope {
                scope: active.name().to_string(),
                action: format!("delegate to {}", scope.name()),
            });
        }
        if self.depth() >= self.max_depth {
            return Err(DispatchError::DelegationTooDeep(self.max_depth));
        }

        let mut frame = Frame::new(id);
        let carried = frame.memory.carry(carry, scope.carry_keys(), self.max_carry_fields);
        if let Some(goal) = goal {
            frame.memory.set_goal(goal);
        }
        tracing::debug!(scope = %scope.name(), carried = ?carried, depth = self.depth() + 1, "delegated");
        self.delegated.push(frame);
        Ok(id)
    }

    pub fn complete(&mut self, summary: impl Into<String>) -> Result<Handback, DispatchError> {
        self.pop(HandbackKind::Completed {
            summary: summary.into(),
        })
    }

    pub fn escalate(&mut self, reason: impl Into<String>) -> Result<Handback, DispatchError> {
        self.pop(HandbackKind::Escalated {
            reason: reason.into(),
        })
    }

    fn pop(&mut self, kind: HandbackKind) -> Result<Handback, DispatchError> {
        let frame = self.delegated.pop().ok_or(DispatchError::CannotPopPrimary)?;
        Ok(Handback {
            from: frame.scope,
            to: self.active_scope(),
            kind,
        })
    }
}
