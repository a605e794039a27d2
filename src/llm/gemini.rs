//! Google Gemini chat sessions.
//!
//! A session is created once per request from the prior turns and the
//! per-model configuration (thinking budget, grounding tools, image
//! settings). Sending the new turn streams `GenerateContentResponse`
//! objects over server-sent events.

use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::catalog::Capability;
use crate::llm::sse::{EventParser, LineEvent, response_chunks};
use crate::llm::{
    Attachment, ChunkStream, GenerationRequest, ModelInfo, ModelKind, Provider, Role,
    StreamChunk, Usage, map_transport_error, parse_data_url,
};
use crate::transport::ResilientTransport;

/// Output cap for models without a thinking budget.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Adapter for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    transport: ResilientTransport,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(transport: ResilientTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    /// Open a session for the request and stream the reply to its new turn.
    pub async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream, LlmError> {
        let mut session = GeminiChatSession::create(self, request);

        let mut parts = Vec::with_capacity(request.attachments.len() + 1);
        if let Some(pending) = session.take_trailing_user_turn() {
            parts.extend(pending.parts);
        }
        parts.push(GeminiPart::Text {
            text: request.new_message.clone(),
        });
        parts.extend(image_parts(&self.transport, &request.attachments).await);

        session.send_message_stream(parts).await
    }
}

/// A chat session bound to one model, its history and its configuration.
pub struct GeminiChatSession<'a> {
    adapter: &'a GeminiAdapter,
    model: String,
    api_key: SecretString,
    history: Vec<GeminiContent>,
    config: SessionConfig,
}

/// Per-model session settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    pub google_search: bool,
    pub google_maps: bool,
    pub image_output: bool,
}

impl SessionConfig {
    /// Derive the session settings from the catalog entry and the request.
    pub fn for_request(model: &ModelInfo, request: &GenerationRequest) -> Self {
        let normalized = request.normalized_history();
        let thinking_budget = model.thinking_budget;
        Self {
            system_instruction: normalized.system,
            temperature: Some(request.config.temperature),
            top_p: Some(request.config.top_p),
            // A thinking budget and an output cap conflict; the budget wins.
            max_output_tokens: thinking_budget
                .is_none()
                .then(|| request.config.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)),
            thinking_budget,
            google_search: model.has(Capability::Search) || request.force_grounding,
            google_maps: model.has(Capability::Maps),
            image_output: model.kind == ModelKind::ImageGeneration,
        }
    }
}

impl<'a> GeminiChatSession<'a> {
    /// Create a session seeded with the request's normalized history.
    pub fn create(adapter: &'a GeminiAdapter, request: &GenerationRequest) -> Self {
        let history = request
            .normalized_history()
            .turns
            .into_iter()
            .map(|turn| GeminiContent {
                role: if turn.role == Role::Model {
                    "model".to_string()
                } else {
                    "user".to_string()
                },
                parts: vec![GeminiPart::Text { text: turn.content }],
            })
            .collect();

        Self {
            adapter,
            model: request.model_id().to_string(),
            api_key: request.api_key.clone(),
            history,
            config: SessionConfig::for_request(&request.model, request),
        }
    }

    /// Remove a trailing user turn so the next send keeps roles alternating.
    fn take_trailing_user_turn(&mut self) -> Option<GeminiContent> {
        if self.history.last().is_some_and(|c| c.role == "user") {
            self.history.pop()
        } else {
            None
        }
    }

    fn build_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.adapter.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, parts: Vec<GeminiPart>) -> GeminiRequest {
        let mut contents = self.history.clone();
        contents.push(GeminiContent {
            role: "user".to_string(),
            parts,
        });

        let mut tools = Vec::new();
        if self.config.google_search {
            tools.push(GeminiTool::GoogleSearch {
                google_search: EmptyObject {},
            });
        }
        if self.config.google_maps {
            tools.push(GeminiTool::GoogleMaps {
                google_maps: EmptyObject {},
            });
        }

        GeminiRequest {
            contents,
            system_instruction: self.config.system_instruction.as_ref().map(|text| {
                GeminiSystemInstruction {
                    parts: vec![GeminiPart::Text { text: text.clone() }],
                }
            }),
            generation_config: Some(GeminiGenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
                thinking_config: self.config.thinking_budget.map(|thinking_budget| {
                    GeminiThinkingConfig { thinking_budget }
                }),
                image_config: self.config.image_output.then(|| GeminiImageConfig {
                    image_size: "1K".to_string(),
                    aspect_ratio: "1:1".to_string(),
                }),
                response_modalities: None,
            }),
            tools,
        }
    }

    /// Send the new turn and stream the reply.
    pub async fn send_message_stream(
        &self,
        parts: Vec<GeminiPart>,
    ) -> Result<ChunkStream, LlmError> {
        let body = self.build_request(parts);

        tracing::debug!(
            provider = "Google",
            model = %self.model,
            history_turns = self.history.len(),
            "Sending Gemini session message"
        );

        let builder = self
            .adapter
            .transport
            .client()
            .post(self.build_url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body);

        let response = self
            .adapter
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(Provider::Google, e))?;

        Ok(response_chunks(Provider::Google, response, GeminiStreamParser))
    }
}

/// Convert image attachments into inline parts.
pub(crate) async fn image_parts(
    transport: &ResilientTransport,
    attachments: &[Attachment],
) -> Vec<GeminiPart> {
    let mut parts = Vec::new();
    for attachment in attachments.iter().filter(|a| a.is_image()) {
        if let Some(inline_data) = load_image(transport, attachment).await {
            parts.push(GeminiPart::InlineData { inline_data });
        }
    }
    parts
}

/// Resolve an image attachment to base64 data.
///
/// Data URLs are decoded in place; remote images are downloaded. A failed
/// download is logged and the attachment skipped.
pub(crate) async fn load_image(
    transport: &ResilientTransport,
    attachment: &Attachment,
) -> Option<GeminiInlineData> {
    if let Some((mime_type, data)) = parse_data_url(&attachment.url) {
        return Some(GeminiInlineData {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        });
    }

    let response = match transport.execute(transport.client().get(&attachment.url)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(attachment = %attachment.name, error = %e, "Failed to fetch image attachment");
            return None;
        }
    };
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| attachment.mime_type.clone())
        .unwrap_or_else(|| "image/jpeg".to_string());

    match response.bytes().await {
        Ok(bytes) => Some(GeminiInlineData {
            mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        }),
        Err(e) => {
            tracing::warn!(attachment = %attachment.name, error = %e, "Failed to read image attachment");
            None
        }
    }
}

/// Parses streamed `GenerateContentResponse` payloads.
struct GeminiStreamParser;

impl EventParser for GeminiStreamParser {
    fn parse_data(&mut self, data: &str) -> Result<LineEvent, serde_json::Error> {
        let response: GeminiResponse = serde_json::from_str(data)?;

        if let Some(error) = response.error {
            return Ok(LineEvent::one(StreamChunk::error(error.message)));
        }
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Ok(LineEvent::one(StreamChunk::error(format!(
                "Response blocked: {}",
                reason
            ))));
        }

        let candidate = response.candidates.into_iter().next();
        let text = candidate
            .as_ref()
            .map(GeminiCandidate::text)
            .filter(|t| !t.is_empty());
        let grounding_metadata = candidate.and_then(|c| c.grounding_metadata);
        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u
                .total_token_count
                .unwrap_or(u.prompt_token_count + u.candidates_token_count),
        });

        if text.is_none() && grounding_metadata.is_none() && usage.is_none() {
            return Ok(LineEvent::Skip);
        }
        Ok(LineEvent::one(StreamChunk {
            text,
            grounding_metadata,
            usage,
            error: None,
        }))
    }
}

// ── Gemini API request/response types ──────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiRequest {
    pub(crate) contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) tools: Vec<GeminiTool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GeminiSystemInstruction {
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiContent {
    pub(crate) role: String,
    pub(crate) parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) thinking_config: Option<GeminiThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image_config: Option<GeminiImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiThinkingConfig {
    pub(crate) thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiImageConfig {
    pub(crate) image_size: String,
    pub(crate) aspect_ratio: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum GeminiTool {
    GoogleSearch {
        #[serde(rename = "googleSearch")]
        google_search: EmptyObject,
    },
    GoogleMaps {
        #[serde(rename = "googleMaps")]
        google_maps: EmptyObject,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct EmptyObject {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

impl GeminiResponse {
    /// First inline image in the first candidate.
    pub(crate) fn first_inline_image(&self) -> Option<&GeminiInlineData> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    grounding_metadata: Option<serde_json::Value>,
}

impl GeminiCandidate {
    /// Visible text of the candidate, excluding thought summaries.
    fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}
