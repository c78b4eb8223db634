//! Request and response types shared by every backend.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffer size of the channel behind a [`ChatStream`].
pub const STREAM_BUFFER: usize = 64;

/// The speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Input for a chat completion.
///
/// Optional sampling parameters left as `None` are not sent to the backend,
/// so the backend's own defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Backend to route to. `None` selects the gateway default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Model id. Empty selects the gateway default model.
    #[serde(default)]
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum number of output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus-sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ChatRequest {
    /// Create a request for `model` with the given messages.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self { model: model.into(), messages, ..Default::default() }
    }

    /// Route to a specific backend.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of output tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the nucleus-sampling parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the stop sequences.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }
}

/// Token counts reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from input/output counts.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self { input_tokens, output_tokens, total_tokens: input_tokens.saturating_add(output_tokens) }
    }
}

/// Output of a successful chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Backend-assigned response id, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the backend that served the request.
    pub backend: String,
    /// Model that produced the content.
    pub model: String,
    /// Generated text.
    pub content: String,
    /// Token counts.
    pub usage: Usage,
    /// Estimated cost in USD, filled in by the gateway.
    pub cost_usd: f64,
    /// Wall-clock latency of the successful attempt, filled in by the gateway.
    pub latency_ms: u64,
}

/// One item of a streaming chat completion.
///
/// A stream ends with exactly one [`StreamEvent::Done`] or [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of generated text.
    Delta(String),
    /// Terminal event with the final token counts.
    Done {
        /// Token counts, zero when the backend does not report them.
        usage: Usage,
    },
    /// Terminal error event.
    Error(String),
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

/// Consumer side of a streaming completion.
pub type ChatStream = ReceiverStream<StreamEvent>;

/// Producer side of a streaming completion.
pub type StreamSender = mpsc::Sender<StreamEvent>;

/// Create a bounded single-producer/single-consumer event channel.
pub fn stream_channel() -> (StreamSender, ChatStream) {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    (tx, ReceiverStream::new(rx))
}

/// Input for batch embedding generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Backend to route to. `None` selects the gateway default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Embedding model id. Empty lets the backend pick its default.
    #[serde(default)]
    pub model: String,
    /// Texts to embed.
    pub input: Vec<String>,
}

impl EmbeddingRequest {
    /// Create a request embedding `input` with `model`.
    pub fn new(model: impl Into<String>, input: Vec<String>) -> Self {
        Self { backend: None, model: model.into(), input }
    }
}

/// Output of batch embedding generation. `embeddings[i]` belongs to `input[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Name of the backend that served the request.
    pub backend: String,
    /// Model that produced the vectors.
    pub model: String,
    /// One vector per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,
    /// Prompt tokens consumed.
    pub tokens: u32,
    /// Estimated cost in USD, filled in by the gateway.
    pub cost_usd: f64,
}

/// What a model is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Chat/completion model.
    Chat,
    /// Embedding model.
    Embedding,
}

impl ModelKind {
    /// Classify a model id by name.
    pub fn of(model: &str) -> Self {
        if model.contains("embed") { ModelKind::Embedding } else { ModelKind::Chat }
    }
}

/// A model offered by a configured backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Backend name.
    pub backend: String,
    /// Model id.
    pub model: String,
    /// Model kind.
    pub kind: ModelKind,
}
