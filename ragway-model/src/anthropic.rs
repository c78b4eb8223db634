//! Anthropic Messages API backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::error::{ModelError, Result};
use crate::http::{self, Frame};
use crate::types::{
    ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse, Role, Usage,
};

const NAME: &str = "anthropic";
const BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Backend for Claude models. Embeddings are not offered by this API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicBackend {
    /// Create a backend authenticated with `api_key`.
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self { client: http::client(NAME, timeout)?, api_key: api_key.to_string() })
    }

    fn post(&self) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{BASE_URL}/v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// System messages move to the top-level `system` field; several are joined
/// with blank lines.
fn messages_body(request: &ChatRequest, stream: bool) -> MessagesBody<'_> {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => system.push(message.content.as_str()),
            Role::User | Role::Assistant => {
                messages.push(Message { role: message.role.as_str(), content: &message.content })
            }
        }
    }

    MessagesBody {
        model: &request.model,
        max_tokens: request.max_tokens.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: &request.stop,
        stream,
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    id: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    message: Option<StreamMessage>,
    delta: Option<StreamDelta>,
    usage: Option<ApiUsage>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Interpret the data of one SSE event. The event type is repeated inside
/// the payload, so the `event:` field is not needed.
fn parse_stream_event(data: &str) -> Frame {
    let payload: StreamPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(e) => return Frame::Error(format!("{NAME} stream event could not be parsed: {e}")),
    };

    match payload.kind.as_str() {
        "message_start" => match payload.message {
            Some(message) => {
                Frame::Usage(Usage::new(message.usage.input_tokens, message.usage.output_tokens))
            }
            None => Frame::Skip,
        },
        "content_block_delta" => match payload.delta {
            Some(delta) if delta.kind == "text_delta" && !delta.text.is_empty() => {
                Frame::Delta(delta.text)
            }
            _ => Frame::Skip,
        },
        "message_delta" => match payload.usage {
            Some(usage) => Frame::Usage(Usage::new(usage.input_tokens, usage.output_tokens)),
            None => Frame::Skip,
        },
        "message_stop" => Frame::Done,
        "error" => Frame::Error(
            payload.error.map(|e| e.message).unwrap_or_else(|| "stream error".to_string()),
        ),
        _ => Frame::Skip,
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn models(&self) -> Vec<String> {
        [
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
            "claude-sonnet-4-20250514",
            "claude-opus-4-20250514",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let body = messages_body(request, false);
        let response = http::send(NAME, self.post().json(&body)).await?;
        let message: MessagesResponse = http::json(NAME, response).await?;

        let content: String = message
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();
        let model = if message.model.is_empty() { request.model.clone() } else { message.model };

        Ok(ChatResponse {
            id: message.id,
            backend: NAME.to_string(),
            model,
            content,
            usage: Usage::new(message.usage.input_tokens, message.usage.output_tokens),
            cost_usd: 0.0,
            latency_ms: 0,
        })
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        let body = messages_body(request, true);
        let response = http::send(NAME, self.post().json(&body)).await?;
        Ok(http::spawn_sse_stream(ctx, response.bytes_stream(), parse_stream_event))
    }

    async fn generate_embedding(
        &self,
        _ctx: &RequestContext,
        _request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        Err(ModelError::Unsupported { backend: NAME.to_string(), operation: "embeddings" })
    }
}
