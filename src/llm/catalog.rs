//! Model catalog: maps a model id to its provider and capabilities.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::Provider;

/// Image-generation model selected by the image command.
pub const IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
/// Video-generation model selected by the video command.
pub const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";
/// Search-grounded model selected by the web/search commands.
pub const SEARCH_MODEL: &str = "gemini-3-flash-preview";
/// Extended-thinking model selected by the deep command.
pub const DEEP_MODEL: &str = "gemini-3-pro-preview";

/// Feature flags advertised for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    /// Accepts image input (or produces images, for image generators).
    Image,
    Video,
    Code,
    Reasoning,
    /// Search grounding tool.
    Search,
    /// Maps grounding tool.
    Maps,
}

/// How a model produces output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Streams text.
    Text,
    /// Returns one image per request.
    ImageGeneration,
    /// Starts a long-running job that ends with a video.
    VideoGeneration,
}

impl ModelKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub kind: ModelKind,
    pub capabilities: Vec<Capability>,
    /// Rejects sampling parameters and the system role.
    pub reasoning_only: bool,
    /// Thinking budget for session-style backends.
    pub thinking_budget: Option<u32>,
}

impl ModelInfo {
    /// A text model with the given capabilities.
    pub fn text(id: &str, name: &str, provider: Provider, capabilities: &[Capability]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            kind: ModelKind::Text,
            capabilities: capabilities.to_vec(),
            reasoning_only: is_reasoning_only_id(id),
            thinking_budget: None,
        }
    }

    fn media(id: &str, name: &str, provider: Provider, kind: ModelKind) -> Self {
        let capability = match kind {
            ModelKind::VideoGeneration => Capability::Video,
            _ => Capability::Image,
        };
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            kind,
            capabilities: vec![capability],
            reasoning_only: false,
            thinking_budget: None,
        }
    }

    fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Model ids of the o-series accept neither sampling parameters nor a
/// system role.
pub fn is_reasoning_only_id(model_id: &str) -> bool {
    model_id.starts_with("o1") || model_id.starts_with("o3")
}

/// The set of models the dispatcher can target.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        use Capability::*;
        use Provider::*;

        let models = vec![
            // Google
            ModelInfo::text("gemini-2.5-flash", "Gemini 2.5 Flash", Google, &[Text, Image, Code, Maps]),
            ModelInfo::text(DEEP_MODEL, "Gemini 3 Pro", Google, &[Text, Image, Code, Reasoning])
                .with_thinking_budget(32768),
            ModelInfo::text(SEARCH_MODEL, "Gemini 3 Flash", Google, &[Text, Search]),
            ModelInfo::media("gemini-2.5-flash-image", "Gemini 2.5 Flash Image", Google, ModelKind::ImageGeneration),
            ModelInfo::media(IMAGE_MODEL, "Gemini 3 Pro Image", Google, ModelKind::ImageGeneration),
            ModelInfo::media(VIDEO_MODEL, "Veo 3.1 Fast", Google, ModelKind::VideoGeneration),
            ModelInfo::media("veo-3.1-generate-preview", "Veo 3.1 High-Quality", Google, ModelKind::VideoGeneration),
            // OpenAI
            ModelInfo::text("gpt-4o", "GPT-4o", OpenAi, &[Text, Image, Code]),
            ModelInfo::text("gpt-4o-mini", "GPT-4o Mini", OpenAi, &[Text, Code]),
            ModelInfo::text("o1-preview", "o1 Preview", OpenAi, &[Text, Reasoning]),
            ModelInfo::text("o1-mini", "o1 Mini", OpenAi, &[Text, Reasoning, Code]),
            ModelInfo::media("dall-e-3", "DALL-E 3", OpenAi, ModelKind::ImageGeneration),
            // Anthropic
            ModelInfo::text("claude-3-5-sonnet-20240620", "Claude 3.5 Sonnet", Anthropic, &[Text, Image, Code]),
            ModelInfo::text("claude-3-opus-20240229", "Claude 3 Opus", Anthropic, &[Text, Code]),
            ModelInfo::text("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", Anthropic, &[Text]),
            // DeepSeek
            ModelInfo::text("deepseek-chat", "DeepSeek V3", DeepSeek, &[Text, Code]),
            ModelInfo::text("deepseek-reasoner", "DeepSeek R1", DeepSeek, &[Text, Reasoning]),
            ModelInfo::text("deepseek-coder", "DeepSeek Coder", DeepSeek, &[Text, Code]),
            // Groq
            ModelInfo::text("llama-3.3-70b-versatile", "Llama 3.3 70B", Groq, &[Text]),
            ModelInfo::text("mixtral-8x7b-32768", "Mixtral 8x7B", Groq, &[Text]),
            ModelInfo::text("gemma2-9b-it", "Gemma 2 9B", Groq, &[Text]),
        ];

        Self { models }
    }
}

impl ModelCatalog {
    /// A catalog holding only the given models.
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    /// Add or replace an entry.
    pub fn with_model(mut self, model: ModelInfo) -> Self {
        self.models.retain(|m| m.id != model.id);
        self.models.push(model);
        self
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Look up a model, failing with [`LlmError::UnknownModel`].
    pub fn resolve(&self, model_id: &str) -> Result<&ModelInfo, LlmError> {
        self.get(model_id).ok_or_else(|| LlmError::UnknownModel {
            model: model_id.to_string(),
        })
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_targets_are_in_catalog() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.resolve(IMAGE_MODEL).unwrap().kind, ModelKind::ImageGeneration);
        assert_eq!(catalog.resolve(VIDEO_MODEL).unwrap().kind, ModelKind::VideoGeneration);
        assert!(catalog.resolve(SEARCH_MODEL).unwrap().has(Capability::Search));
        assert_eq!(catalog.resolve(DEEP_MODEL).unwrap().thinking_budget, Some(32768));
    }

    #[test]
    fn test_reasoning_only_models() {
        let catalog = ModelCatalog::default();
        assert!(catalog.resolve("o1-preview").unwrap().reasoning_only);
        assert!(catalog.resolve("o1-mini").unwrap().reasoning_only);
        assert!(!catalog.resolve("gpt-4o").unwrap().reasoning_only);
        assert!(!catalog.resolve("deepseek-reasoner").unwrap().reasoning_only);
    }

    #[test]
    fn test_image_input_is_not_image_generation() {
        let catalog = ModelCatalog::default();
        let flash = catalog.resolve("gemini-2.5-flash").unwrap();
        assert!(flash.has(Capability::Image));
        assert_eq!(flash.kind, ModelKind::Text);
        assert!(catalog.resolve("dall-e-3").unwrap().kind.is_media());
    }

    #[test]
    fn test_unknown_model() {
        let err = ModelCatalog::default().resolve("gpt-99").unwrap_err();
        assert!(matches!(err, LlmError::UnknownModel { ref model } if model == "gpt-99"));
    }

    #[test]
    fn test_with_model_replaces_entry() {
        let catalog = ModelCatalog::default().with_model(ModelInfo::text(
            "gpt-4o",
            "Custom",
            Provider::OpenAi,
            &[Capability::Text],
        ));
        assert_eq!(catalog.resolve("gpt-4o").unwrap().name, "Custom");
        assert_eq!(catalog.models().iter().filter(|m| m.id == "gpt-4o").count(), 1);
    }
}
