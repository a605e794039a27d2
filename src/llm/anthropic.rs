//! Anthropic Messages API.
//!
//! Streams typed events. Text arrives only in `content_block_delta`;
//! prompt tokens are announced in `message_start` and completion tokens in
//! `message_delta`, so the parser carries the former until the latter shows up.

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::sse::{EventParser, LineEvent, response_chunks};
use crate::llm::{
    ChatTurn, ChunkStream, DEFAULT_MAX_TOKENS, GenerationRequest, Role, StreamChunk, Usage,
    map_transport_error, normalize_history,
};
use crate::transport::ResilientTransport;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    transport: ResilientTransport,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(transport: ResilientTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    /// Send the request and stream the response.
    pub async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream, LlmError> {
        let provider = request.provider();
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = build_request(request);

        tracing::debug!(provider = %provider, model = request.model_id(), "Starting messages stream");

        let builder = self
            .transport
            .client()
            .post(&url)
            .header("x-api-key", request.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let response = self
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(provider, e))?;

        Ok(response_chunks(provider, response, MessagesParser::default()))
    }
}

fn build_request(request: &GenerationRequest) -> MessagesRequest {
    let normalized = request.normalized_history();

    let mut turns = normalized.turns;
    turns.push(ChatTurn::user(request.new_message.clone()));
    let messages = normalize_history(&turns, None)
        .turns
        .into_iter()
        .map(|turn| MessagesMessage {
            role: if turn.role == Role::Model {
                "assistant"
            } else {
                "user"
            },
            content: turn.content,
        })
        .collect();

    MessagesRequest {
        model: request.model_id().to_string(),
        max_tokens: request.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.config.temperature,
        system: normalized.system,
        messages,
        stream: true,
    }
}

#[derive(Debug, Default)]
struct MessagesParser {
    input_tokens: u32,
}

impl EventParser for MessagesParser {
    fn parse_data(&mut self, data: &str) -> Result<LineEvent, serde_json::Error> {
        let event: MessagesEvent = serde_json::from_str(data)?;
        let parsed = match event {
            MessagesEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
                LineEvent::Skip
            }
            MessagesEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) if !text.is_empty() => LineEvent::one(StreamChunk::text(text)),
                _ => LineEvent::Skip,
            },
            MessagesEvent::MessageDelta { usage: Some(usage) } => LineEvent::one(
                StreamChunk::usage(Usage::new(self.input_tokens, usage.output_tokens)),
            ),
            MessagesEvent::MessageDelta { usage: None } => LineEvent::Skip,
            MessagesEvent::Error { error } => LineEvent::one(StreamChunk::error(error.message)),
            MessagesEvent::MessageStop => LineEvent::Done,
            MessagesEvent::Other => LineEvent::Skip,
        };
        Ok(parsed)
    }
}

// ── Messages API wire types ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessagesMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct MessagesMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Error {
        error: EventError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EventError {
    message: String,
}
