//! Ollama backend for locally served models.

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

const NAME: &str = "ollama";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Backend for an Ollama server. Local models carry no cost.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    /// Create a backend for the server at `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(NAME, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{path}", self.base_url))
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options<'a>>,
}

#[derive(Serialize)]
struct Options<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
}

fn chat_body(request: &ChatRequest, stream: bool) -> ChatBody<'_> {
    let options = Options {
        temperature: request.temperature,
        num_predict: request.max_tokens,
        top_p: request.top_p,
        stop: &request.stop,
    };
    let has_options = options.temperature.is_some()
        || options.num_predict.is_some()
        || options.top_p.is_some()
        || !options.stop.is_empty();

    ChatBody {
        model: &request.model,
        messages: &request.messages,
        stream,
        options: has_options.then_some(options),
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    prompt_eval_count: u32,
}

/// Interpret one NDJSON line of a streaming chat.
fn parse_stream_line(line: &str) -> Frame {
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => return Frame::Error(format!("{NAME} stream line could not be parsed: {e}")),
    };
    if let Some(error) = chunk.error {
        return Frame::Error(error);
    }
    if chunk.done {
        return match chunk.message.map(|m| m.content).filter(|c| !c.is_empty()) {
            Some(text) => {
                Frame::DeltaWithUsage(text, Usage::new(chunk.prompt_eval_count, chunk.eval_count))
            }
            None => Frame::Usage(Usage::new(chunk.prompt_eval_count, chunk.eval_count)),
        };
    }
    match chunk.message {
        Some(message) if !message.content.is_empty() => Frame::Delta(message.content),
        _ => Frame::Skip,
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn models(&self) -> Vec<String> {
        ["llama3", "mistral", "codellama", "nomic-embed-text"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let body = chat_body(request, false);
        let response = http::send(NAME, self.post("/api/chat").json(&body)).await?;
        let chunk: ChatChunk = http::json(NAME, response).await?;
        if let Some(error) = chunk.error {
            return Err(http::parse_error(NAME, error));
        }

        Ok(ChatResponse {
            id: None,
            backend: NAME.to_string(),
            model: request.model.clone(),
            content: chunk.message.map(|m| m.content).unwrap_or_default(),
            usage: Usage::new(chunk.prompt_eval_count, chunk.eval_count),
            cost_usd: 0.0,
            latency_ms: 0,
        })
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        let body = chat_body(request, true);
        let response = http::send(NAME, self.post("/api/chat").json(&body)).await?;
        // The final `done` line carries only counts; the stream helper turns
        // end-of-body into the terminal event.
        Ok(http::spawn_ndjson_stream(ctx, response.bytes_stream(), parse_stream_line))
    }

    async fn generate_embedding(
        &self,
        _ctx: &RequestContext,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let model =
            if request.model.is_empty() { DEFAULT_EMBEDDING_MODEL } else { request.model.as_str() };
        let body = EmbedBody { model, input: &request.input };
        let response = http::send(NAME, self.post("/api/embed").json(&body)).await?;
        let result: EmbedResponse = http::json(NAME, response).await?;

        Ok(EmbeddingResponse {
            backend: NAME.to_string(),
            model: model.to_string(),
            embeddings: result.embeddings,
            tokens: result.prompt_eval_count,
            cost_usd: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_only_sent_when_set() {
        let plain = ChatRequest::new("llama3", vec![ChatMessage::user("hi")]);
        let body = serde_json::to_value(chat_body(&plain, false)).unwrap();
        assert!(body.get("options").is_none());

        let tuned = plain.clone().with_max_tokens(64);
        let body = serde_json::to_value(chat_body(&tuned, true)).unwrap();
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parses_ndjson_lines() {
        assert_eq!(
            parse_stream_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#),
            Frame::Delta("Hel".to_string())
        );
        assert_eq!(
            parse_stream_line(
                r#"{"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":7,"eval_count":3}"#
            ),
            Frame::Usage(Usage::new(7, 3))
        );
        assert_eq!(
            parse_stream_line(r#"{"error":"model 'x' not found"}"#),
            Frame::Error("model 'x' not found".to_string())
        );
    }
}
