//! 作用域：具名任务上下文（主助手、航班、酒店、租车、游览、日历）
//!
//! 作用域在启动时创建、之后只读共享；ScopeTable 是预分配的数组，委派栈只保存下标（ScopeId）。
//! 主作用域恒为下标 0。

pub mod stack;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::DispatchError;
use crate::reasoning::ReasoningAdapter;

pub use stack::{DelegationStack, Frame, Handback, HandbackKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const PRIMARY: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Scope {
    name: String,
    description: String,
    actions: BTreeSet<String>,
    /// 委派时接受的上下文键；为空表示接受任意键
    carry_keys: Vec<String>,
    adapter: Arc<dyn ReasoningAdapter>,
    primary: bool,
}

impl Scope {
    pub fn new(name: &str, description: &str, adapter: Arc<dyn ReasoningAdapter>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            actions: BTreeSet::new(),
            carry_keys: Vec::new(),
            adapter,
            primary: false,
        }
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.actions.extend(actions.iter().map(|a| a.to_string()));
        self
    }

    pub fn with_carry_keys(mut self, keys: &[&str]) -> Self {
        self.carry_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn actions(&self) -> impl Iterator<Item = &String> {
        self.actions.iter()
    }

    pub fn permits(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    pub fn carry_keys(&self) -> &[String] {
        &self.carry_keys
    }

    pub fn adapter(&self) -> &Arc<dyn ReasoningAdapter> {
        &self.adapter
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .field("carry_keys", &self.carry_keys)
            .field("primary", &self.primary)
            .finish()
    }
}

/// 作用域表：启动时构建，之后只读
#[derive(Debug)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    by_name: HashMap<String, ScopeId>,
}

impl ScopeTable {
    pub fn new(mut primary: Scope) -> Self {
        primary.primary = true;
        let mut by_name = HashMap::new();
        by_name.insert(primary.name.clone(), ScopeId::PRIMARY);
        Self {
            scopes: vec![primary],
            by_name,
        }
    }

    pub fn register(&mut self, scope: Scope) -> Result<ScopeId, DispatchError> {
        if self.by_name.contains_key(&scope.name) {
            return Err(DispatchError::DuplicateScope(scope.name));
        }
        let id = ScopeId(self.scopes.len());
        self.by_name.insert(scope.name.clone(), id);
        self.scopes.push(scope);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Result<ScopeId, DispatchError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::UnknownScope(name.to_string()))
    }

    /// 按下标取作用域；下标越界意味着簿记损坏
    pub fn get(&self, id: ScopeId) -> Result<&Scope, DispatchError> {
        self.scopes
            .get(id.0)
            .ok_or_else(|| DispatchError::InvariantViolated(format!("scope {id} is not in the table")))
    }

    pub fn primary(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn names(&self) -> Vec<&str> {
        self.scopes.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
