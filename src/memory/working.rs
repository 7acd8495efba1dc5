//! 作用域工作记忆：委派时携带的上下文字段
//!
//! 调用方已解析出的标识（乘客号、城市、日期等）在委派时按目标作用域声明的键复制进来，
//! 避免专用助手重复询问；拼入 system prompt 的 "Known context" 段落。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkingMemory {
    pub goal: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = Some(goal.into());
    }

    /// 按白名单复制上下文字段，最多 `max` 个；`accepted` 为空时接受任意键。
    /// 返回实际复制的键。
    pub fn carry(&mut self, context: &Map<String, Value>, accepted: &[String], max: usize) -> Vec<String> {
        let mut carried = Vec::new();
        for (key, value) in context {
            if !accepted.is_empty() && !accepted.iter().any(|a| a == key) {
                continue;
            }
            if self.fields.len() >= max && !self.fields.contains_key(key) {
                break;
            }
            self.fields.insert(key.clone(), value.clone());
            carried.push(key.clone());
        }
        carried
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.goal.is_none()
    }

    /// 构建供推理适配器使用的 Prompt 片段（Current Goal / Known context）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if let Some(goal) = &self.goal {
            s.push_str(&format!("## Current Goal\n{}\n\n", goal));
        }
        if !self.fields.is_empty() {
            s.push_str("## Known context\n");
            for (k, v) in &self.fields {
                s.push_str(&format!("- {}: {}\n", k, v));
            }
            s.push('\n');
        }
        s
    }
}
