//! 规则适配器（离线演示，无需 API）
//!
//! 用正则匹配最近一条用户输入，命中第一条规则即生成决策；同时命中两个以上意图时请求澄清。
//! 最近一轮是动作结果或交还记录时，直接把它转述给用户，避免重复提案。

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::actions::control::{COMPLETE, ESCALATE};
use crate::memory::Role;
use crate::reasoning::{ConversationView, Decision, ReasoningAdapter, ReasoningError};

type DecisionBuilder = Box<dyn Fn(&Captures<'_>) -> Decision + Send + Sync>;

struct Rule {
    pattern: Regex,
    build: DecisionBuilder,
}

pub struct RuleAdapter {
    intents: Vec<(String, Regex)>,
    rules: Vec<Rule>,
    fallback: String,
}

impl RuleAdapter {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            intents: Vec::new(),
            rules: Vec::new(),
            fallback: fallback.into(),
        }
    }

    /// 注册一个意图探测器，用于多意图识别
    pub fn intent(mut self, label: &str, pattern: &str) -> Result<Self, regex::Error> {
        self.intents.push((label.to_string(), Regex::new(pattern)?));
        Ok(self)
    }

    pub fn rule<F>(mut self, pattern: &str, build: F) -> Result<Self, regex::Error>
    where
        F: Fn(&Captures<'_>) -> Decision + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            pattern: Regex::new(pattern)?,
            build: Box::new(build),
        });
        Ok(self)
    }

    pub fn decide(&self, text: &str) -> Decision {
        let matched: Vec<String> = self
            .intents
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(label, _)| label.clone())
            .collect();
        if matched.len() > 1 {
            return Decision::Ambiguous {
                question: format!(
                    "I can help with {}. Which one should I start with?",
                    matched.join(" and ")
                ),
                intents: matched,
            };
        }

        self.rules
            .iter()
            .find_map(|rule| rule.pattern.captures(text).map(|c| (rule.build)(&c)))
            .unwrap_or_else(|| Decision::respond(self.fallback.clone()))
    }
}

#[async_trait]
impl ReasoningAdapter for RuleAdapter {
    async fn propose(&self, view: &ConversationView<'_>) -> Result<Decision, ReasoningError> {
        match view.turns.last() {
            Some(t) if t.role == Role::ActionResult => Ok(Decision::respond(t.content.clone())),
            Some(t)
                if t.role == Role::Control
                    && matches!(t.action.as_deref(), Some(COMPLETE) | Some(ESCALATE)) =>
            {
                Ok(Decision::respond(format!("{} {}", t.content, self.fallback)))
            }
            _ => {
                let text = view
                    .turns
                    .iter()
                    .rev()
                    .find(|t| t.role == Role::User)
                    .map(|t| t.content.as_str())
                    .unwrap_or_default();
                Ok(self.decide(text))
            }
        }
    }
}
