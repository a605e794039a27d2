use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{RwLock, watch};
use tokio_stream::wrappers::WatchStream;

use super::{Message, MessageSink, MessageUpdate};
use crate::error::StoreError;

/// Ordered snapshots of a conversation's messages. The current state is
/// yielded first, then one snapshot per change.
pub type MessageSubscription = Pin<Box<dyn Stream<Item = Vec<Message>> + Send>>;

/// Persistence layer behind the durable sink.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<(), StoreError>;

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), StoreError>;

    async fn subscribe_messages(&self, conversation_id: &str) -> MessageSubscription;
}

/// Sink that writes through to a [`MessageStore`] under one conversation.
///
/// Readers observe changes through the store's subscription, so store
/// failures are logged here and not reported back to the writer.
pub struct DurableSink {
    conversation_id: String,
    store: Arc<dyn MessageStore>,
}

impl DurableSink {
    pub fn new(conversation_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            store,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl std::fmt::Debug for DurableSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableSink")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSink for DurableSink {
    async fn create_placeholder(&self, mut message: Message) {
        message.conversation_id = Some(self.conversation_id.clone());
        let message_id = message.id.clone();
        if let Err(e) = self
            .store
            .create_message(&self.conversation_id, message)
            .await
        {
            tracing::error!(
                conversation_id = %self.conversation_id,
                message_id = %message_id,
                error = %e,
                "Failed to create message"
            );
        }
    }

    async fn update(&self, id: &str, update: MessageUpdate) {
        if let Err(e) = self
            .store
            .update_message(&self.conversation_id, id, update)
            .await
        {
            tracing::error!(
                conversation_id = %self.conversation_id,
                message_id = id,
                error = %e,
                "Failed to update message"
            );
        }
    }
}

/// Store backed by one `watch` channel per conversation.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    conversations: RwLock<HashMap<String, watch::Sender<Vec<Message>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    async fn channel(&self, conversation_id: &str) -> watch::Sender<Vec<Message>> {
        if let Some(tx) = self.conversations.read().await.get(conversation_id) {
            return tx.clone();
        }
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .clone()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<(), StoreError> {
        let tx = self.channel(conversation_id).await;
        tx.send_modify(|messages| messages.push(message));
        Ok(())
    }

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), StoreError> {
        let not_found = || StoreError::NotFound {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        };

        let tx = self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(not_found)?;

        let mut found = false;
        tx.send_if_modified(|messages| {
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                update.apply_to(message);
                found = true;
            }
            found
        });

        if found { Ok(()) } else { Err(not_found()) }
    }

    async fn subscribe_messages(&self, conversation_id: &str) -> MessageSubscription {
        let rx = self.channel(conversation_id).await.subscribe();
        Box::pin(WatchStream::new(rx))
    }
}
