//! Generation backends.
//!
//! Every backend, whatever its wire protocol, is consumed through the same
//! [`StreamChunk`] sequence. Adapters live in one module per protocol
//! family and are selected through [`ProviderAdapter`].

pub mod anthropic;
pub mod catalog;
pub mod gemini;
pub mod media;
pub mod openai;
pub mod provider;
mod sse;

use std::pin::Pin;

use futures::Stream;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use catalog::{ModelCatalog, ModelInfo, ModelKind};
pub use media::{MediaGenerator, MediaKind, MediaPolling, MediaRef};
pub use provider::{Provider, ProviderAdapter, ProviderEndpoints, ProviderFamily};

use crate::error::LlmError;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Model,
}

/// One prior turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Kind of a user-supplied attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file or image sent along with a user turn.
///
/// `url` is either a remote URL or a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    /// An image attachment.
    pub fn image(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            url: url.into(),
            name: name.into(),
            mime_type: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == AttachmentKind::Image
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its mime type and payload.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    if mime.is_empty() || payload.is_empty() {
        return None;
    }
    Some((mime, payload))
}

/// Output cap used when none is configured.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Sampling parameters applied to a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    /// Output cap. Each family applies its own default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// Everything an adapter needs to run one generation.
///
/// Built once per target model per turn and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Catalog entry of the target model.
    pub model: ModelInfo,
    pub history: Vec<ChatTurn>,
    pub new_message: String,
    pub attachments: Vec<Attachment>,
    pub api_key: SecretString,
    pub config: GenerationConfig,
    /// Enable search grounding regardless of the model's capabilities.
    pub force_grounding: bool,
}

impl GenerationRequest {
    pub fn model_id(&self) -> &str {
        &self.model.id
    }

    pub fn provider(&self) -> Provider {
        self.model.provider
    }

    /// Protocol family of the request's provider.
    pub fn family(&self) -> ProviderFamily {
        self.model.provider.family()
    }

    /// History with adjacent roles merged and system turns hoisted.
    pub fn normalized_history(&self) -> NormalizedHistory {
        normalize_history(&self.history, self.config.system_prompt.as_deref())
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One wire-normalized event from a backend stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub grounding_metadata: Option<serde_json::Value>,
    pub usage: Option<Usage>,
    /// Failure reported by the backend inside an otherwise healthy stream.
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Finite, non-restartable sequence of chunks produced by one generation.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// A citation extracted from grounding metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingRef {
    pub title: String,
    pub uri: String,
}

/// Collect web and map citations from a grounding metadata object.
pub fn grounding_refs(metadata: &serde_json::Value) -> Vec<GroundingRef> {
    let Some(chunks) = metadata.get("groundingChunks").and_then(|c| c.as_array()) else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| chunk.get("web").or_else(|| chunk.get("maps")))
        .filter_map(|source| {
            let uri = source.get("uri")?.as_str()?;
            let title = source
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or(uri);
            Some(GroundingRef {
                title: title.to_string(),
                uri: uri.to_string(),
            })
        })
        .collect()
}

/// History ready for submission: strictly alternating user/model turns plus
/// the hoisted system instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedHistory {
    pub system: Option<String>,
    pub turns: Vec<ChatTurn>,
}

/// Merge adjacent same-role turns and hoist system turns out of history.
///
/// Merged contents are joined with a blank line. System turns are joined
/// with a newline, after the configured system prompt.
pub fn normalize_history(history: &[ChatTurn], system_prompt: Option<&str>) -> NormalizedHistory {
    let mut system: Vec<&str> = system_prompt
        .filter(|s| !s.trim().is_empty())
        .into_iter()
        .collect();
    let mut turns: Vec<ChatTurn> = Vec::new();

    for turn in history {
        if turn.role == Role::System {
            system.push(&turn.content);
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => turns.push(turn.clone()),
        }
    }

    NormalizedHistory {
        system: (!system.is_empty()).then(|| system.join("\n")),
        turns,
    }
}

/// Pull a human-readable message out of an error body.
///
/// Backends wrap failures as `{"error": {"message": ...}}` (or a bare string
/// under `error`); anything else falls back to the status code.
pub(crate) fn error_message_from_body(status: u16, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| e.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("Status {}", status))
}

/// Translate a failed transport call into a provider error.
pub(crate) fn map_transport_error(provider: Provider, err: crate::error::TransportError) -> LlmError {
    use crate::error::TransportError;
    use crate::transport::is_retryable_status;

    match err {
        TransportError::Http { status, body } => {
            let reason = error_message_from_body(status, &body);
            if is_retryable_status(status) {
                LlmError::Transient {
                    provider: provider.name().to_string(),
                    status,
                    reason,
                }
            } else {
                LlmError::RequestFailed {
                    provider: provider.name().to_string(),
                    reason,
                }
            }
        }
        other => LlmError::RequestFailed {
            provider: provider.name().to_string(),
            reason: other.to_string(),
        },
    }
}
