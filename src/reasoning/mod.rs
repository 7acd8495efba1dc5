//! 推理层：适配器契约与实现（LLM / 规则 / 脚本）

pub mod adapter;
pub mod llm;
pub mod rules;
pub mod scripted;

pub use adapter::{
    ActionProposal, ConversationView, Decision, ReasoningAdapter, ReasoningError,
};
pub use llm::{parse_decision, LlmReasoningAdapter};
pub use rules::RuleAdapter;
pub use scripted::{ScriptedAdapter, SeenView};
