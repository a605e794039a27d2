//! Message sinks.
//!
//! The orchestrator writes through a [`MessageSink`] and never learns where
//! the messages end up. A session picks the sink once, from its
//! [`ConversationMode`], and hands it to the orchestrator.

mod durable;
mod ephemeral;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use durable::{DurableSink, InMemoryMessageStore, MessageStore, MessageSubscription};
pub use ephemeral::EphemeralSink;

use crate::llm::{Attachment, GroundingRef, MediaRef, Usage};

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

/// A conversation message as stored by a sink.
///
/// `id` is assigned before any network call and never changes; every
/// partial and final update of a model's answer targets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    /// Model id for model messages.
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub thinking: bool,
    pub error: bool,
    pub usage: Option<Usage>,
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub grounding_refs: Vec<GroundingRef>,
    pub media: Option<MediaRef>,
}

impl Message {
    /// A finished user message.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: None,
            role: MessageRole::User,
            content: content.into(),
            model: None,
            timestamp: Utc::now(),
            attachments,
            thinking: false,
            error: false,
            usage: None,
            latency_ms: None,
            grounding_refs: Vec::new(),
            media: None,
        }
    }

    /// An empty model message in the thinking state.
    pub fn placeholder(model_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: None,
            role: MessageRole::Model,
            content: String::new(),
            model: Some(model_id.into()),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            thinking: true,
            error: false,
            usage: None,
            latency_ms: None,
            grounding_refs: Vec::new(),
            media: None,
        }
    }
}

/// Partial update of a stored message. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub thinking: Option<bool>,
    pub error: Option<bool>,
    pub usage: Option<Usage>,
    pub latency_ms: Option<u64>,
    pub grounding_refs: Option<Vec<GroundingRef>>,
    pub media: Option<MediaRef>,
}

impl MessageUpdate {
    /// Replace the content, leaving everything else as is.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Terminal update for a failed generation.
    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            thinking: Some(false),
            error: Some(true),
            ..Default::default()
        }
    }

    /// Whether this update ends the thinking state.
    pub fn is_terminal(&self) -> bool {
        self.thinking == Some(false)
    }

    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content.clone_from(content);
        }
        if let Some(thinking) = self.thinking {
            message.thinking = thinking;
        }
        if let Some(error) = self.error {
            message.error = error;
        }
        if let Some(usage) = self.usage {
            message.usage = Some(usage);
        }
        if let Some(latency_ms) = self.latency_ms {
            message.latency_ms = Some(latency_ms);
        }
        if let Some(refs) = &self.grounding_refs {
            message.grounding_refs.clone_from(refs);
        }
        if let Some(media) = &self.media {
            message.media = Some(media.clone());
        }
    }
}

/// Destination of message writes.
///
/// Both operations are fire-and-forget: implementations log their own
/// failures instead of returning them.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn create_placeholder(&self, message: Message);

    async fn update(&self, id: &str, update: MessageUpdate);
}

/// Where a session's messages live. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationMode {
    /// Persisted under a conversation id.
    Durable(String),
    /// In memory only; discarded with the session.
    Ephemeral,
}

/// Pick the sink for a mode. This is the only place that branches on it.
pub fn select_sink(
    mode: &ConversationMode,
    store: Arc<dyn MessageStore>,
    scratch: EphemeralSink,
) -> Arc<dyn MessageSink> {
    match mode {
        ConversationMode::Durable(conversation_id) => {
            Arc::new(DurableSink::new(conversation_id.clone(), store))
        }
        ConversationMode::Ephemeral => Arc::new(scratch),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::llm::MediaKind;

    #[test]
    fn test_placeholder_state() {
        let msg = Message::placeholder("gpt-4o");
        assert_eq!(msg.role, MessageRole::Model);
        assert!(msg.thinking);
        assert!(!msg.error);
        assert_eq!(msg.content, "");
        assert_eq!(msg.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Message::placeholder("a").id, Message::placeholder("a").id);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut msg = Message::placeholder("gpt-4o");
        MessageUpdate::content("Hel").apply_to(&mut msg);
        assert_eq!(msg.content, "Hel");
        assert!(msg.thinking);

        let done = MessageUpdate {
            thinking: Some(false),
            usage: Some(Usage::new(3, 4)),
            latency_ms: Some(120),
            ..Default::default()
        };
        assert!(done.is_terminal());
        done.apply_to(&mut msg);
        assert_eq!(msg.content, "Hel");
        assert!(!msg.thinking);
        assert_eq!(msg.usage, Some(Usage::new(3, 4)));
        assert_eq!(msg.latency_ms, Some(120));
    }

    #[test]
    fn test_failed_update() {
        let mut msg = Message::placeholder("claude-3-opus-20240229");
        MessageUpdate::failed("Anthropic API key missing. Please check your settings.")
            .apply_to(&mut msg);
        assert!(msg.error);
        assert!(!msg.thinking);
        assert!(msg.content.starts_with("Anthropic API key missing"));
    }

    #[test]
    fn test_media_update() {
        let mut msg = Message::placeholder("dall-e-3");
        MessageUpdate {
            media: Some(MediaRef {
                kind: MediaKind::Image,
                url: "https://img/1.png".to_string(),
            }),
            ..Default::default()
        }
        .apply_to(&mut msg);
        assert_eq!(msg.media.unwrap().url, "https://img/1.png");
    }

    #[tokio::test]
    async fn test_select_sink_by_mode() {
        let store = Arc::new(InMemoryMessageStore::new());
        let scratch = EphemeralSink::new();

        let ephemeral = select_sink(&ConversationMode::Ephemeral, store.clone(), scratch.clone());
        ephemeral.create_placeholder(Message::placeholder("m")).await;
        assert_eq!(scratch.messages().await.len(), 1);
        assert!(store.messages("c1").await.is_empty());

        let durable = select_sink(
            &ConversationMode::Durable("c1".to_string()),
            store.clone(),
            scratch.clone(),
        );
        durable.create_placeholder(Message::placeholder("m")).await;
        assert_eq!(scratch.messages().await.len(), 1);
        assert_eq!(store.messages("c1").await.len(), 1);
    }
}
