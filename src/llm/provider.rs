//! Provider roster and protocol-family dispatch.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::anthropic::AnthropicAdapter;
use crate::llm::gemini::GeminiAdapter;
use crate::llm::openai::OpenAiCompatibleAdapter;
use crate::llm::{ChunkStream, GenerationRequest};
use crate::transport::ResilientTransport;

/// A backend vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Google,
    OpenAi,
    Anthropic,
    DeepSeek,
    Groq,
}

impl Provider {
    /// Display name, used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::DeepSeek => "DeepSeek",
            Self::Groq => "Groq",
        }
    }

    /// Wire protocol spoken by this provider.
    pub fn family(&self) -> ProviderFamily {
        match self {
            Self::Google => ProviderFamily::GeminiSession,
            Self::OpenAi | Self::DeepSeek | Self::Groq => ProviderFamily::OpenAiCompatible,
            Self::Anthropic => ProviderFamily::AnthropicMessages,
        }
    }

    pub const ALL: [Provider; 5] = [
        Self::Google,
        Self::OpenAi,
        Self::Anthropic,
        Self::DeepSeek,
        Self::Groq,
    ];
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFamily {
    /// `data:` lines carrying `choices[0].delta.content`, ended by `[DONE]`.
    OpenAiCompatible,
    /// Typed events; text arrives in `content_block_delta`.
    AnthropicMessages,
    /// Chat session created with history, then one streamed send.
    GeminiSession,
}

/// Base URLs for every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
    pub deepseek: String,
    pub groq: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com/v1".to_string(),
            anthropic: "https://api.anthropic.com/v1".to_string(),
            deepseek: "https://api.deepseek.com".to_string(),
            groq: "https://api.groq.com/openai/v1".to_string(),
            gemini: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every provider at the same base URL. Used against local fakes.
    pub fn all(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            openai: base.clone(),
            anthropic: base.clone(),
            deepseek: base.clone(),
            groq: base.clone(),
            gemini: base,
        }
    }

    /// Base URL of one provider, without a trailing slash.
    pub fn base_url(&self, provider: Provider) -> &str {
        let url = match provider {
            Provider::Google => &self.gemini,
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::DeepSeek => &self.deepseek,
            Provider::Groq => &self.groq,
        };
        url.trim_end_matches('/')
    }
}

/// One adapter per protocol family.
#[derive(Debug, Clone)]
pub enum ProviderAdapter {
    OpenAiCompatible(OpenAiCompatibleAdapter),
    Anthropic(AnthropicAdapter),
    Gemini(GeminiAdapter),
}

impl ProviderAdapter {
    /// Pick the adapter for a protocol family.
    pub fn select(
        family: ProviderFamily,
        transport: ResilientTransport,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        match family {
            ProviderFamily::OpenAiCompatible => {
                Self::OpenAiCompatible(OpenAiCompatibleAdapter::new(transport, endpoints.clone()))
            }
            ProviderFamily::AnthropicMessages => Self::Anthropic(AnthropicAdapter::new(
                transport,
                endpoints.base_url(Provider::Anthropic),
            )),
            ProviderFamily::GeminiSession => Self::Gemini(GeminiAdapter::new(
                transport,
                endpoints.base_url(Provider::Google),
            )),
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            Self::OpenAiCompatible(_) => ProviderFamily::OpenAiCompatible,
            Self::Anthropic(_) => ProviderFamily::AnthropicMessages,
            Self::Gemini(_) => ProviderFamily::GeminiSession,
        }
    }

    /// Start a generation and return its chunk sequence.
    ///
    /// Fails before yielding anything when the backend rejects the request.
    pub async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream, LlmError> {
        match self {
            Self::OpenAiCompatible(adapter) => adapter.stream(request).await,
            Self::Anthropic(adapter) => adapter.stream(request).await,
            Self::Gemini(adapter) => adapter.stream(request).await,
        }
    }
}
