//! Fan-out orchestrator.
//!
//! One user turn goes to every target model at once. Each model gets its
//! own message id, written as a placeholder before any network call, and
//! its own task that streams into that message. Tasks never share state:
//! a failing or cancelled model only ever touches its own message.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::credentials::{ApiKeys, CredentialResolver};
use crate::error::LlmError;
use crate::llm::{
    Attachment, ChatTurn, GenerationConfig, GenerationRequest, GroundingRef, MediaGenerator,
    MediaRef, ModelCatalog, ProviderAdapter, ProviderEndpoints, Usage, grounding_refs,
};
use crate::sink::{Message, MessageSink, MessageUpdate};
use crate::transport::ResilientTransport;

/// Extra instructions rendered into the system prompt of every model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContext {
    /// Overrides the configured global system prompt when set.
    pub instructions: Option<String>,
    pub persona: Option<String>,
    pub memories: Vec<String>,
    /// Excerpts from project files.
    pub knowledge: Vec<String>,
}

impl SystemContext {
    /// Render the sections in order, or `None` when there is nothing to say.
    pub fn render(&self, global: Option<&str>) -> Option<String> {
        let mut out = String::new();

        let instructions = self
            .instructions
            .as_deref()
            .or(global)
            .filter(|s| !s.trim().is_empty());
        if let Some(instructions) = instructions {
            out.push_str(&format!("[System Instructions]: {}\n\n", instructions));
        }
        if let Some(persona) = self.persona.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str(&format!("[Role/Persona]: {}\n\n", persona));
        }
        if !self.memories.is_empty() {
            out.push_str("[User Context/Memories]:\n");
            for memory in &self.memories {
                out.push_str(&format!("- {}\n", memory));
            }
            out.push('\n');
        }
        if !self.knowledge.is_empty() {
            out.push_str("[Context from Project/Workspace Files]:\n");
            out.push_str(&self.knowledge.join("\n\n"));
            out.push_str("\n\n");
        }

        let out = out.trim_end();
        (!out.is_empty()).then(|| out.to_string())
    }
}

/// Everything about a turn that is shared by all target models.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// The enriched prompt.
    pub prompt: String,
    /// Prior turns, oldest first.
    pub history: Vec<ChatTurn>,
    pub attachments: Vec<Attachment>,
    pub force_grounding: bool,
    pub context: SystemContext,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// How one model's task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Completed,
    /// Failed with the text written into the message.
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOutcome {
    pub model_id: String,
    pub message_id: String,
    pub status: ModelStatus,
}

/// Terminal state of every model targeted by a turn, in target order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub outcomes: Vec<ModelOutcome>,
}

impl TurnReport {
    pub fn get(&self, model_id: &str) -> Option<&ModelOutcome> {
        self.outcomes.iter().find(|o| o.model_id == model_id)
    }

    pub fn all_completed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == ModelStatus::Completed)
    }
}

/// Output gathered while a model streams. Lives outside the generation
/// future so a cancelled task can still report what it had.
#[derive(Debug, Default)]
struct Accumulator {
    content: String,
    grounding: Vec<GroundingRef>,
    usage: Option<Usage>,
}

enum Finished {
    Streamed,
    Media(MediaRef),
}

/// Runs one turn against many models.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    catalog: ModelCatalog,
    credentials: CredentialResolver,
    transport: ResilientTransport,
    endpoints: ProviderEndpoints,
    media: MediaGenerator,
    generation: GenerationConfig,
    max_concurrent: usize,
}

impl Orchestrator {
    /// Build from configuration, with the administrator keys as fallback
    /// credentials and the default model catalog.
    pub fn new(config: &DispatchConfig) -> Self {
        let transport = ResilientTransport::new(config.retry.clone());
        let media = MediaGenerator::new(
            transport.clone(),
            config.endpoints.clone(),
            config.media_polling,
        );
        Self {
            catalog: ModelCatalog::default(),
            credentials: CredentialResolver::new(ApiKeys::new(), config.admin_keys.clone()),
            transport,
            endpoints: config.endpoints.clone(),
            media,
            generation: config.generation.clone(),
            max_concurrent: config.max_concurrent_models.max(1),
        }
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Use the given user keys ahead of the administrator keys.
    pub fn with_user_keys(mut self, keys: ApiKeys) -> Self {
        self.credentials = self.credentials.with_user_keys(keys);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    /// Send a turn to every model in `models` and wait for all of them.
    ///
    /// Placeholders for all models are written before any task starts.
    /// Repeated model ids are targeted once. At most `max_concurrent`
    /// models generate at the same time; the rest wait for a permit.
    pub async fn dispatch(
        &self,
        turn: &TurnRequest,
        models: &[String],
        sink: Arc<dyn MessageSink>,
        cancel: CancellationToken,
    ) -> TurnReport {
        let mut targets: Vec<&str> = Vec::with_capacity(models.len());
        for model in models {
            if !targets.contains(&model.as_str()) {
                targets.push(model.as_str());
            }
        }

        let mut placeholders = Vec::with_capacity(targets.len());
        for model_id in &targets {
            let message = Message::placeholder(*model_id);
            placeholders.push((*model_id, message.id.clone()));
            sink.create_placeholder(message).await;
        }

        tracing::info!(models = targets.len(), "Dispatching turn");

        let semaphore = Semaphore::new(self.max_concurrent);
        let tasks = placeholders.iter().map(|(model_id, message_id)| {
            self.run_model(
                turn,
                model_id,
                message_id,
                sink.as_ref(),
                &semaphore,
                &cancel,
            )
        });
        let statuses = futures::future::join_all(tasks).await;

        TurnReport {
            outcomes: placeholders
                .into_iter()
                .zip(statuses)
                .map(|((model_id, message_id), status)| ModelOutcome {
                    model_id: model_id.to_string(),
                    message_id,
                    status,
                })
                .collect(),
        }
    }

    async fn run_model(
        &self,
        turn: &TurnRequest,
        model_id: &str,
        message_id: &str,
        sink: &dyn MessageSink,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> ModelStatus {
        let mut acc = Accumulator::default();
        // Set once a permit is held, so queueing is not counted as latency.
        let mut started: Option<Instant> = None;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = async {
                let _permit = semaphore.acquire().await.ok();
                started = Some(Instant::now());
                self.generate(turn, model_id, message_id, sink, &mut acc).await
            } => result,
        };

        let latency_ms = started.map_or(0, |at| at.elapsed().as_millis() as u64);

        match result {
            Ok(Finished::Streamed) => {
                tracing::info!(
                    model = model_id,
                    message_id,
                    latency_ms,
                    chars = acc.content.len(),
                    "Generation complete"
                );
                let grounding_refs = (!acc.grounding.is_empty()).then_some(acc.grounding);
                sink.update(
                    message_id,
                    MessageUpdate {
                        content: Some(acc.content),
                        thinking: Some(false),
                        error: Some(false),
                        usage: acc.usage,
                        latency_ms: Some(latency_ms),
                        grounding_refs,
                        media: None,
                    },
                )
                .await;
                ModelStatus::Completed
            }
            Ok(Finished::Media(media)) => {
                tracing::info!(model = model_id, message_id, latency_ms, "Media ready");
                sink.update(
                    message_id,
                    MessageUpdate {
                        content: Some(media.caption().to_string()),
                        thinking: Some(false),
                        error: Some(false),
                        latency_ms: Some(latency_ms),
                        media: Some(media),
                        ..Default::default()
                    },
                )
                .await;
                ModelStatus::Completed
            }
            Err(LlmError::Cancelled) => {
                tracing::info!(model = model_id, message_id, "Generation cancelled");
                let content = if acc.content.is_empty() {
                    LlmError::Cancelled.to_string()
                } else {
                    acc.content
                };
                sink.update(
                    message_id,
                    MessageUpdate {
                        latency_ms: Some(latency_ms),
                        ..MessageUpdate::failed(content)
                    },
                )
                .await;
                ModelStatus::Cancelled
            }
            Err(e) => {
                let text = e.to_string();
                tracing::warn!(model = model_id, message_id, error = %text, "Generation failed");
                sink.update(
                    message_id,
                    MessageUpdate {
                        latency_ms: Some(latency_ms),
                        ..MessageUpdate::failed(text.clone())
                    },
                )
                .await;
                ModelStatus::Failed(text)
            }
        }
    }

    async fn generate(
        &self,
        turn: &TurnRequest,
        model_id: &str,
        message_id: &str,
        sink: &dyn MessageSink,
        acc: &mut Accumulator,
    ) -> Result<Finished, LlmError> {
        let model = self.catalog.resolve(model_id)?.clone();
        let api_key = self.credentials.resolve(model.provider)?;

        if model.kind.is_media() {
            let media = self
                .media
                .generate(&model, &turn.prompt, &turn.attachments, &api_key)
                .await?;
            return Ok(Finished::Media(media));
        }

        let provider = model.provider;
        let config = GenerationConfig {
            system_prompt: turn
                .context
                .render(self.generation.system_prompt.as_deref()),
            ..self.generation.clone()
        };
        let request = GenerationRequest {
            model,
            history: turn.history.clone(),
            new_message: turn.prompt.clone(),
            attachments: turn.attachments.clone(),
            api_key,
            config,
            force_grounding: turn.force_grounding,
        };

        let adapter = ProviderAdapter::select(
            provider.family(),
            self.transport.clone(),
            &self.endpoints,
        );
        tracing::debug!(model = model_id, %provider, family = ?adapter.family(), "Starting stream");
        let mut stream = adapter.stream(&request).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if let Some(reason) = chunk.error {
                return Err(LlmError::Generation {
                    provider: provider.name().to_string(),
                    reason,
                });
            }

            let mut changed = false;
            if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
                acc.content.push_str(&text);
                changed = true;
            }
            if let Some(metadata) = chunk.grounding_metadata {
                let refs = grounding_refs(&metadata);
                if !refs.is_empty() {
                    acc.grounding = refs;
                    changed = true;
                }
            }
            if let Some(usage) = chunk.usage {
                acc.usage = Some(usage);
            }

            if changed {
                let grounding_refs = (!acc.grounding.is_empty()).then(|| acc.grounding.clone());
                sink.update(
                    message_id,
                    MessageUpdate {
                        content: Some(acc.content.clone()),
                        grounding_refs,
                        ..Default::default()
                    },
                )
                .await;
            }
        }

        Ok(Finished::Streamed)
    }
}
