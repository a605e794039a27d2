//! Image and video generation.
//!
//! Media models do not stream. Images come back from a single request;
//! videos start a long-running operation that is polled until it is done.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;
use crate::llm::gemini::{
    GeminiContent, GeminiGenerationConfig, GeminiImageConfig, GeminiPart, GeminiRequest,
    GeminiResponse, load_image,
};
use crate::llm::{
    Attachment, ModelInfo, ModelKind, Provider, ProviderEndpoints, map_transport_error,
};
use crate::transport::ResilientTransport;

/// What a media reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Location of a generated image or video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaRef {
    /// Message content shown next to the media.
    pub fn caption(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "Generated Image:",
            MediaKind::Video => "Generated Video:",
        }
    }
}

/// Polling schedule for long-running video jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPolling {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for MediaPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }
}

/// Runs image and video generations.
#[derive(Debug, Clone)]
pub struct MediaGenerator {
    transport: ResilientTransport,
    endpoints: ProviderEndpoints,
    polling: MediaPolling,
}

impl MediaGenerator {
    pub fn new(
        transport: ResilientTransport,
        endpoints: ProviderEndpoints,
        polling: MediaPolling,
    ) -> Self {
        Self {
            transport,
            endpoints,
            polling,
        }
    }

    /// Generate media for a prompt with one request (images) or a polled
    /// job (videos).
    pub async fn generate(
        &self,
        model: &ModelInfo,
        prompt: &str,
        attachments: &[Attachment],
        api_key: &SecretString,
    ) -> Result<MediaRef, LlmError> {
        tracing::info!(model = %model.id, provider = %model.provider, "Generating media");

        match (model.kind, model.provider) {
            (ModelKind::ImageGeneration, Provider::OpenAi) => {
                self.openai_image(model, prompt, api_key).await
            }
            (ModelKind::ImageGeneration, Provider::Google) => {
                self.gemini_image(model, prompt, api_key).await
            }
            (ModelKind::VideoGeneration, Provider::Google) => {
                self.gemini_video(model, prompt, attachments, api_key).await
            }
            _ => Err(LlmError::RequestFailed {
                provider: model.provider.name().to_string(),
                reason: format!("Media generation not supported for {}", model.id),
            }),
        }
    }

    async fn openai_image(
        &self,
        model: &ModelInfo,
        prompt: &str,
        api_key: &SecretString,
    ) -> Result<MediaRef, LlmError> {
        let url = format!("{}/images/generations", self.endpoints.base_url(Provider::OpenAi));
        let body = json!({
            "model": model.id,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let builder = self
            .transport
            .client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .json(&body);
        let response = self
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(Provider::OpenAi, e))?;

        let parsed: ImagesResponse = response.json().await.map_err(|e| invalid(Provider::OpenAi, e))?;
        image_url_from(parsed).map(|url| MediaRef {
            kind: MediaKind::Image,
            url,
        })
    }

    async fn gemini_image(
        &self,
        model: &ModelInfo,
        prompt: &str,
        api_key: &SecretString,
    ) -> Result<MediaRef, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoints.base_url(Provider::Google),
            model.id
        );
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: None,
            generation_config: Some(GeminiGenerationConfig {
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                image_config: Some(GeminiImageConfig {
                    image_size: "1K".to_string(),
                    aspect_ratio: "1:1".to_string(),
                }),
                ..GeminiGenerationConfig::default()
            }),
            tools: Vec::new(),
        };

        let builder = self
            .transport
            .client()
            .post(&url)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body);
        let response = self
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(Provider::Google, e))?;

        let parsed: GeminiResponse = response.json().await.map_err(|e| invalid(Provider::Google, e))?;
        let image = parsed.first_inline_image().ok_or_else(|| LlmError::Generation {
            provider: Provider::Google.name().to_string(),
            reason: "No image returned".to_string(),
        })?;

        Ok(MediaRef {
            kind: MediaKind::Image,
            url: format!("data:{};base64,{}", image.mime_type, image.data),
        })
    }

    async fn gemini_video(
        &self,
        model: &ModelInfo,
        prompt: &str,
        attachments: &[Attachment],
        api_key: &SecretString,
    ) -> Result<MediaRef, LlmError> {
        let base = self.endpoints.base_url(Provider::Google);
        let url = format!("{}/v1beta/models/{}:predictLongRunning", base, model.id);

        let mut instance = json!({ "prompt": prompt });
        if let Some(first) = attachments.iter().find(|a| a.is_image())
            && let Some(image) = load_image(&self.transport, first).await
        {
            instance["image"] = json!({
                "bytesBase64Encoded": image.data,
                "mimeType": image.mime_type,
            });
        }
        let body = json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": video_aspect_ratio(prompt),
                "resolution": "720p",
                "sampleCount": 1,
            },
        });

        let builder = self
            .transport
            .client()
            .post(&url)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body);
        let response = self
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(Provider::Google, e))?;
        let mut operation: VideoOperation =
            response.json().await.map_err(|e| invalid(Provider::Google, e))?;

        let mut polls = 0;
        while !operation.done {
            if polls >= self.polling.max_polls {
                return Err(LlmError::Generation {
                    provider: Provider::Google.name().to_string(),
                    reason: format!("Video generation did not finish after {} polls", polls),
                });
            }
            tokio::time::sleep(self.polling.interval).await;
            polls += 1;

            tracing::debug!(model = %model.id, operation = %operation.name, polls, "Polling video operation");

            let builder = self
                .transport
                .client()
                .get(format!("{}/v1beta/{}", base, operation.name))
                .header("x-goog-api-key", api_key.expose_secret());
            let response = self
                .transport
                .execute(builder)
                .await
                .map_err(|e| map_transport_error(Provider::Google, e))?;
            operation = response.json().await.map_err(|e| invalid(Provider::Google, e))?;
        }

        video_uri_from(operation).map(|url| MediaRef {
            kind: MediaKind::Video,
            url,
        })
    }
}

/// Portrait output when the prompt asks for it, landscape otherwise.
pub fn video_aspect_ratio(prompt: &str) -> &'static str {
    let lower = prompt.to_lowercase();
    if lower.contains("portrait") || lower.contains("9:16") {
        "9:16"
    } else {
        "16:9"
    }
}

fn invalid(provider: Provider, err: reqwest::Error) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.name().to_string(),
        reason: err.to_string(),
    }
}

fn image_url_from(response: ImagesResponse) -> Result<String, LlmError> {
    if let Some(error) = response.error {
        return Err(LlmError::Generation {
            provider: Provider::OpenAi.name().to_string(),
            reason: error.message,
        });
    }
    response
        .data
        .into_iter()
        .find_map(|d| d.url)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: Provider::OpenAi.name().to_string(),
            reason: "No image URL in response".to_string(),
        })
}

fn video_uri_from(operation: VideoOperation) -> Result<String, LlmError> {
    if let Some(error) = operation.error {
        return Err(LlmError::Generation {
            provider: Provider::Google.name().to_string(),
            reason: error
                .message
                .unwrap_or_else(|| "Video generation failed".to_string()),
        });
    }
    operation
        .response
        .and_then(|r| r.generate_video_response)
        .and_then(|r| r.generated_samples.into_iter().next())
        .and_then(|s| s.video)
        .map(|v| v.uri)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: Provider::Google.name().to_string(),
            reason: "No video URI returned".to_string(),
        })
}

// ── Wire types ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoOperation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<VideoOperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoOperationResponse {
    #[serde(default)]
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    #[serde(default)]
    video: Option<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    uri: String,
}
