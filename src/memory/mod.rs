//! 记忆层：对话记录（只追加）与作用域工作记忆（委派携带的上下文）

pub mod conversation;
pub mod working;

pub use conversation::{Conversation, Role, Turn};
pub use working::WorkingMemory;
