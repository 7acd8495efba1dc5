//! 核心编排层：错误与恢复、确认闸门、调度器、会话管理、事件与状态投影、运行时构建

pub mod builder;
pub mod confirmation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod recovery;
pub mod session;
pub mod state;
pub mod turn;

pub use builder::{create_llm_from_config, load_system_prompt, RuntimeBuilder};
pub use confirmation::{ConfirmationGate, GatePhase, PendingConfirmation, Resolution};
pub use dispatcher::{ConversationState, Dispatcher, DispatcherSettings, Runtime};
pub use error::{DispatchError, RecoveryAction};
pub use events::TurnEvent;
pub use recovery::RecoveryEngine;
pub use session::ConversationManager;
pub use state::ConversationSnapshot;
pub use turn::{ConfirmationDecision, ConfirmationPrompt, InboundTurn, OutboundTurn};
