//! Chat session: one conversation bound to one sink.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatch::{Orchestrator, SystemContext, TurnReport, TurnRequest};
use crate::enrichment::{Enricher, Enrichment};
use crate::llm::{Attachment, ChatTurn};
use crate::sink::{
    ConversationMode, EphemeralSink, Message, MessageSink, MessageStore, select_sink,
};

/// What a submitted turn did.
#[derive(Debug, Clone)]
pub struct SessionTurn {
    pub enrichment: Enrichment,
    /// Id of the stored user message; `None` when nothing was sent.
    pub user_message_id: Option<String>,
    pub report: TurnReport,
}

/// Runs the full turn pipeline: enrich, store the user message, dispatch.
///
/// The conversation mode is chosen at construction and never changes.
pub struct ChatSession {
    mode: ConversationMode,
    sink: Arc<dyn MessageSink>,
    scratch: EphemeralSink,
    enricher: Arc<Enricher>,
    orchestrator: Arc<Orchestrator>,
    context: SystemContext,
}

impl ChatSession {
    pub fn new(
        mode: ConversationMode,
        store: Arc<dyn MessageStore>,
        enricher: Arc<Enricher>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let scratch = EphemeralSink::new();
        let sink = select_sink(&mode, store, scratch.clone());
        Self {
            mode,
            sink,
            scratch,
            enricher,
            orchestrator,
            context: SystemContext::default(),
        }
    }

    /// Persona, memories and project knowledge for every turn.
    pub fn with_context(mut self, context: SystemContext) -> Self {
        self.context = context;
        self
    }

    pub fn mode(&self) -> &ConversationMode {
        &self.mode
    }

    /// Messages of an ephemeral session. Always empty in durable mode.
    pub async fn ephemeral_messages(&self) -> Vec<Message> {
        self.scratch.messages().await
    }

    pub async fn submit(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        selected_models: &[String],
        history: Vec<ChatTurn>,
    ) -> SessionTurn {
        self.submit_with_cancel(
            text,
            attachments,
            selected_models,
            history,
            CancellationToken::new(),
        )
        .await
    }

    /// Like [`ChatSession::submit`], stopping model tasks when `cancel`
    /// fires.
    pub async fn submit_with_cancel(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        selected_models: &[String],
        history: Vec<ChatTurn>,
        cancel: CancellationToken,
    ) -> SessionTurn {
        if text.trim().is_empty() && attachments.is_empty() {
            return SessionTurn {
                enrichment: Enrichment::passthrough(text),
                user_message_id: None,
                report: TurnReport::default(),
            };
        }

        let enrichment = self.enricher.enrich(text).await;
        if let Some(hint) = &enrichment.usage_hint {
            tracing::debug!(command = ?enrichment.command, hint = %hint, "Command needs input, nothing sent");
            return SessionTurn {
                enrichment,
                user_message_id: None,
                report: TurnReport::default(),
            };
        }

        let user_message = Message::user(enrichment.prompt.clone(), attachments.clone());
        let user_message_id = user_message.id.clone();
        self.sink.create_placeholder(user_message).await;

        let models = enrichment
            .model_override
            .clone()
            .unwrap_or_else(|| selected_models.to_vec());

        let turn = TurnRequest {
            prompt: enrichment.prompt.clone(),
            history,
            attachments,
            force_grounding: enrichment.force_grounding,
            context: self.context.clone(),
        };

        let report = self
            .orchestrator
            .dispatch(&turn, &models, self.sink.clone(), cancel)
            .await;

        SessionTurn {
            enrichment,
            user_message_id: Some(user_message_id),
            report,
        }
    }
}
