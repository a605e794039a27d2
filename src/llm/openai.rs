//! OpenAI-compatible chat completions (OpenAI, DeepSeek, Groq).
//!
//! Streams `data:` lines whose JSON carries text at
//! `choices[0].delta.content`. DeepSeek's reasoning models additionally
//! stream `reasoning_content`, which is surfaced as an italic thinking
//! block. A `data: [DONE]` line ends the stream.

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::sse::{EventParser, LineEvent, response_chunks};
use crate::llm::{
    ChatTurn, ChunkStream, DEFAULT_MAX_TOKENS, GenerationRequest, Provider, ProviderEndpoints,
    Role, StreamChunk, Usage, map_transport_error, normalize_history,
};
use crate::transport::ResilientTransport;

/// Completion cap for reasoning-only models when none is configured.
const REASONING_MAX_COMPLETION_TOKENS: u32 = 65536;

/// Adapter for every provider speaking the chat completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    transport: ResilientTransport,
    endpoints: ProviderEndpoints,
}

impl OpenAiCompatibleAdapter {
    pub fn new(transport: ResilientTransport, endpoints: ProviderEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    fn api_url(&self, provider: Provider) -> String {
        format!("{}/chat/completions", self.endpoints.base_url(provider))
    }

    /// Send the request and stream the response.
    pub async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream, LlmError> {
        let provider = request.provider();
        let url = self.api_url(provider);
        let body = build_request(request);

        tracing::debug!(
            provider = %provider,
            model = request.model_id(),
            reasoning_only = request.model.reasoning_only,
            "Starting chat completion stream"
        );

        let builder = self
            .transport
            .client()
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", request.api_key.expose_secret()),
            )
            .json(&body);

        let response = self
            .transport
            .execute(builder)
            .await
            .map_err(|e| map_transport_error(provider, e))?;

        Ok(response_chunks(provider, response, ChatCompletionParser))
    }
}

/// Build the wire request for one generation.
fn build_request(request: &GenerationRequest) -> ChatCompletionRequest {
    let reasoning_only = request.model.reasoning_only;
    let provider = request.provider();
    let normalized = request.normalized_history();

    let mut turns: Vec<ChatTurn> = Vec::with_capacity(normalized.turns.len() + 2);
    let mut messages: Vec<ChatCompletionMessage> = Vec::new();

    match normalized.system {
        Some(system) if reasoning_only => {
            turns.push(ChatTurn::user(format!("[System Instruction]: {}", system)));
        }
        Some(system) => messages.push(ChatCompletionMessage {
            role: "system",
            content: MessageContent::Text(system),
        }),
        None => {}
    }
    turns.extend(normalized.turns);
    turns.push(ChatTurn::user(request.new_message.clone()));

    // The injected instruction and the new message may now sit next to
    // user turns, so merge once more.
    let turns = normalize_history(&turns, None).turns;
    let last = turns.len().saturating_sub(1);
    let images: Vec<&str> = request
        .attachments
        .iter()
        .filter(|a| a.is_image())
        .map(|a| a.url.as_str())
        .collect();

    for (i, turn) in turns.into_iter().enumerate() {
        let role = match turn.role {
            Role::Model => "assistant",
            _ => "user",
        };

        let content = if i == last
            && provider == Provider::OpenAi
            && !reasoning_only
            && !images.is_empty()
        {
            let mut parts = vec![ContentPart::Text { text: turn.content }];
            parts.extend(images.iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.to_string(),
                },
            }));
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(turn.content)
        };
        messages.push(ChatCompletionMessage { role, content });
    }

    let config = &request.config;
    if reasoning_only {
        ChatCompletionRequest {
            model: request.model_id().to_string(),
            messages,
            stream: true,
            temperature: None,
            top_p: None,
            max_tokens: None,
            max_completion_tokens: Some(
                config.max_tokens.unwrap_or(REASONING_MAX_COMPLETION_TOKENS),
            ),
            stream_options: None,
        }
    } else {
        let include_usage = matches!(provider, Provider::OpenAi | Provider::DeepSeek);
        ChatCompletionRequest {
            model: request.model_id().to_string(),
            messages,
            stream: true,
            temperature: Some(config.temperature),
            top_p: Some(config.top_p),
            max_tokens: Some(config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            max_completion_tokens: None,
            stream_options: include_usage.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

/// Parses chat completion `data:` payloads.
struct ChatCompletionParser;

impl EventParser for ChatCompletionParser {
    fn parse_data(&mut self, data: &str) -> Result<LineEvent, serde_json::Error> {
        if data == "[DONE]" {
            return Ok(LineEvent::Done);
        }

        let event: ChatCompletionChunk = serde_json::from_str(data)?;
        let mut chunks = Vec::new();

        if let Some(error) = event.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            chunks.push(StreamChunk::error(message));
            return Ok(LineEvent::Chunks(chunks));
        }

        if let Some(delta) = event.choices.into_iter().next().and_then(|c| c.delta) {
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                chunks.push(StreamChunk::text(content));
            }
            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                chunks.push(StreamChunk::text(format!("*Thinking: {}*\n\n", reasoning)));
            }
        }

        if let Some(usage) = event.usage {
            chunks.push(StreamChunk::usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage
                    .total_tokens
                    .unwrap_or(usage.prompt_tokens + usage.completion_tokens),
            }));
        }

        if chunks.is_empty() {
            Ok(LineEvent::Skip)
        } else {
            Ok(LineEvent::Chunks(chunks))
        }
    }
}

// ── Chat completions wire types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::llm::Attachment;
    use crate::llm::sse::test_support::collect;
    use crate::llm::test_support::request;

    fn body(req: &GenerationRequest) -> serde_json::Value {
        serde_json::to_value(build_request(req)).unwrap()
    }

    #[test]
    fn test_standard_request_shape() {
        let mut req = request("gpt-4o", "hello");
        req.history = vec![ChatTurn::user("a"), ChatTurn::model("b")];
        req.config.system_prompt = Some("be terse".to_string());

        let body = body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream_options"], json!({"include_usage": true}));
        assert!(body.get("max_completion_tokens").is_none());
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
                {"role": "user", "content": "hello"},
            ])
        );
    }

    #[test]
    fn test_reasoning_only_request_folds_system_into_user_turn() {
        let mut req = request("o1-mini", "solve it");
        req.config.system_prompt = Some("show work".to_string());
        req.history = vec![ChatTurn::user("earlier question"), ChatTurn::model("answer")];

        let body = body(&req);
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["max_completion_tokens"], 65536);
        assert_eq!(
            body["messages"],
            json!([
                {"role": "user", "content": "[System Instruction]: show work\n\nearlier question"},
                {"role": "assistant", "content": "answer"},
                {"role": "user", "content": "solve it"},
            ])
        );
    }

    #[test]
    fn test_stream_options_only_for_openai_and_deepseek() {
        assert!(body(&request("deepseek-chat", "x")).get("stream_options").is_some());
        assert!(body(&request("llama-3.3-70b-versatile", "x")).get("stream_options").is_none());
    }

    #[test]
    fn test_trailing_user_turn_merges_with_new_message() {
        let mut req = request("gpt-4o-mini", "second");
        req.history = vec![ChatTurn::user("first")];
        let body = body(&req);
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": "first\n\nsecond"}])
        );
    }

    #[test]
    fn test_image_attachments_become_content_parts() {
        let mut req = request("gpt-4o", "what is this?");
        req.attachments = vec![Attachment::image("https://img.example/cat.png", "cat.png")];
        let body = body(&req);
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "https://img.example/cat.png"}},
            ])
        );

        // Groq gets plain text even with an image attached.
        let mut groq = request("gemma2-9b-it", "what is this?");
        groq.attachments = req.attachments.clone();
        assert_eq!(body_content(&groq), json!("what is this?"));
    }

    fn body_content(req: &GenerationRequest) -> serde_json::Value {
        body(req)["messages"][0]["content"].clone()
    }

    #[tokio::test]
    async fn test_parser_text_reasoning_usage_and_done() {
        let results = collect(
            ChatCompletionParser,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hmm\"}}]}\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n",
                "data: [DONE]\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            ],
        )
        .await;

        let chunks: Vec<StreamChunk> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("Hel"),
                StreamChunk::text("lo"),
                StreamChunk::text("*Thinking: hmm*\n\n"),
                StreamChunk::usage(Usage::new(3, 2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_parser_skips_malformed_and_empty_deltas() {
        let results = collect(
            ChatCompletionParser,
            &[
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
                "data: {not json\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            ],
        )
        .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().text.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_parser_surfaces_mid_stream_error() {
        let results = collect(
            ChatCompletionParser,
            &["data: {\"error\":{\"message\":\"context length exceeded\"}}\n"],
        )
        .await;
        assert_eq!(
            results[0].as_ref().unwrap().error.as_deref(),
            Some("context length exceeded")
        );
    }
}
