//! OpenAI and OpenAI-compatible chat/embedding backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::error::Result;
use crate::http::{self, Frame};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse,
    Usage,
};

const NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Backend for the OpenAI API and servers that mimic it (vLLM, LM Studio, ...).
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    /// Create a backend. `base_url` defaults to the public OpenAI endpoint.
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(NAME, timeout)?,
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        })
    }

    fn chat_body<'a>(request: &'a ChatRequest, stream: bool) -> ChatBody<'a> {
        ChatBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stop: (!request.stop.is_empty()).then_some(&request.stop),
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{path}", self.base_url)).bearer_auth(&self.api_key)
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    id: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    delta: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        Usage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[derive(Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResult {
    data: Vec<EmbeddingData>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Interpret the data of one SSE event of a streaming completion.
fn parse_stream_event(data: &str) -> Frame {
    if data == "[DONE]" {
        return Frame::Done;
    }
    let chunk: CompletionResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return Frame::Error(format!("{NAME} stream chunk could not be parsed: {e}")),
    };
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    match (text.is_empty(), chunk.usage) {
        (true, None) => Frame::Skip,
        (true, Some(usage)) => Frame::Usage(usage.into()),
        (false, None) => Frame::Delta(text),
        (false, Some(usage)) => Frame::DeltaWithUsage(text, usage.into()),
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn models(&self) -> Vec<String> {
        [
            "gpt-4",
            "gpt-4-turbo",
            "gpt-4o",
            "gpt-4o-mini",
            "gpt-3.5-turbo",
            "text-embedding-3-small",
            "text-embedding-3-large",
            "text-embedding-ada-002",
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
        let body = Self::chat_body(request, false);
        let response = http::send(NAME, self.post("/chat/completions").json(&body)).await?;
        let completion: CompletionResponse = http::json(NAME, response).await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        let model = if completion.model.is_empty() { request.model.clone() } else { completion.model };

        Ok(ChatResponse {
            id: completion.id,
            backend: NAME.to_string(),
            model,
            content,
            usage: completion.usage.unwrap_or_default().into(),
            cost_usd: 0.0,
            latency_ms: 0,
        })
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        let body = Self::chat_body(request, true);
        let response = http::send(NAME, self.post("/chat/completions").json(&body)).await?;
        Ok(http::spawn_sse_stream(ctx, response.bytes_stream(), parse_stream_event))
    }

    async fn generate_embedding(
        &self,
        _ctx: &RequestContext,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let model = if request.model.is_empty() { DEFAULT_EMBEDDING_MODEL } else { request.model.as_str() };
        let body = EmbeddingBody { model, input: &request.input };
        let response = http::send(NAME, self.post("/embeddings").json(&body)).await?;
        let mut result: EmbeddingResult = http::json(NAME, response).await?;

        result.data.sort_by_key(|d| d.index);
        Ok(EmbeddingResponse {
            backend: NAME.to_string(),
            model: model.to_string(),
            embeddings: result.data.into_iter().map(|d| d.embedding).collect(),
            tokens: result.usage.map(|u| u.prompt_tokens).unwrap_or_default(),
            cost_usd: 0.0,
        })
    }
}
