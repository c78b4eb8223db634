//! The provider backend capability.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse};

/// A generation/embedding service reachable by the [`Gateway`](crate::Gateway).
///
/// Implementations wrap one external API (OpenAI, Anthropic, Ollama, ...)
/// behind a uniform async interface. Backends are chosen at startup by
/// configuration and are never inspected for their concrete type.
///
/// Backends report token usage but leave `cost_usd` and `latency_ms` at zero;
/// the gateway stamps both on every successful response.
///
/// # Example
///
/// ```rust,ignore
/// use ragway_model::{Backend, ChatRequest, ChatMessage};
///
/// let response = backend
///     .chat_completion(&ctx, &ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]))
///     .await?;
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry name of the backend (`"openai"`, `"anthropic"`, ...).
    fn name(&self) -> &str;

    /// Model ids this backend advertises.
    fn models(&self) -> Vec<String>;

    /// Run a chat completion and return the full response.
    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse>;

    /// Start a streaming chat completion.
    ///
    /// Events are produced on a dedicated task which owns the sending half
    /// of the channel and closes it after the terminal event.
    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatStream>;

    /// Embed a batch of texts, preserving input order.
    async fn generate_embedding(
        &self,
        ctx: &RequestContext,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse>;
}
