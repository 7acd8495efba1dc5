//! 会话管理：多会话并发，单会话串行
//!
//! 会话表由 RwLock 保护；每个会话的状态有独立的 Mutex，同一会话的轮次依次处理，
//! 不同会话之间互不阻塞。作用域表与动作注册表在 Runtime 中只读共享。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::{
    ConversationSnapshot, ConversationState, Dispatcher, DispatchError, InboundTurn, OutboundTurn,
};

pub struct ConversationManager {
    dispatcher: Dispatcher,
    conversations: RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
}

impl ConversationManager {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 新建会话，返回会话 ID
    pub async fn start(&self) -> String {
        let id = format!("conv_{}", Uuid::new_v4().simple());
        self.open(&id).await;
        id
    }

    /// 取得或创建指定 ID 的会话
    pub async fn open(&self, id: &str) -> Arc<Mutex<ConversationState>> {
        if let Some(existing) = self.conversations.read().await.get(id) {
            return existing.clone();
        }
        let mut map = self.conversations.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(conversation = %id, "conversation started");
                Arc::new(Mutex::new(self.dispatcher.new_conversation(id)))
            })
            .clone()
    }

    async fn get(&self, id: &str) -> Result<Arc<Mutex<ConversationState>>, DispatchError> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownConversation(id.to_string()))
    }

    pub async fn handle(&self, id: &str, inbound: InboundTurn) -> Result<OutboundTurn, DispatchError> {
        let conversation = self.get(id).await?;
        let mut state = conversation.lock().await;
        self.dispatcher.handle_turn(&mut state, inbound).await
    }

    pub async fn snapshot(&self, id: &str) -> Result<ConversationSnapshot, DispatchError> {
        let conversation = self.get(id).await?;
        let state = conversation.lock().await;
        state.snapshot(&self.dispatcher.runtime().scopes)
    }

    pub async fn end(&self, id: &str) -> bool {
        let removed = self.conversations.write().await.remove(id).is_some();
        if removed {
            tracing::info!(conversation = %id, "conversation ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}
