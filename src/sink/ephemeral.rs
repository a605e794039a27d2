use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Message, MessageSink, MessageUpdate};

/// In-process sink for temporary conversations.
///
/// Messages are kept in insertion order and vanish with the last clone.
#[derive(Debug, Clone, Default)]
pub struct EphemeralSink {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl EphemeralSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all messages, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Message> {
        self.messages.read().await.iter().find(|m| m.id == id).cloned()
    }

    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }
}

#[async_trait]
impl MessageSink for EphemeralSink {
    async fn create_placeholder(&self, message: Message) {
        self.messages.write().await.push(message);
    }

    async fn update(&self, id: &str, update: MessageUpdate) {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => update.apply_to(message),
            None => tracing::warn!(message_id = id, "Update for unknown ephemeral message"),
        }
    }
}
