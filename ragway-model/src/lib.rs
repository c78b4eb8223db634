//! # ragway-model
//!
//! Multi-backend LLM gateway: one async interface over OpenAI, Anthropic and
//! Ollama, with retry, fallback and cost accounting.
//!
//! ## Overview
//!
//! - [`Backend`] - the capability every provider implements (chat, streaming
//!   chat, batch embedding, model list)
//! - [`Gateway`] - backend registry with bounded retries, quadratic backoff and
//!   a fallback backend
//! - [`RequestContext`] - tenant scope plus cancellation/deadline, passed to
//!   every call
//! - [`MockBackend`] - scripted backend for tests
//! - [`structured`] - code-fence/JSON parsing of model output
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ragway_model::{ChatMessage, ChatRequest, GatewayConfig, RequestContext};
//!
//! let gateway = GatewayConfig::from_env()?.build_gateway()?;
//! let ctx = RequestContext::new(tenant_id).with_timeout(Duration::from_secs(60));
//!
//! let response = gateway
//!     .chat(&ctx, ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello!")]))
//!     .await?;
//! println!("{} (${:.5})", response.content, response.cost_usd);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature | Chat | Stream | Embeddings |
//! |---------|---------|------|--------|------------|
//! | `openai` | `openai` | yes | SSE | yes |
//! | `anthropic` | `anthropic` | yes | SSE | no |
//! | `ollama` | `ollama` | yes | NDJSON | yes |
//!
//! ## Retry policy
//!
//! [`Gateway::chat`] makes `1 + max_retries` attempts, sleeping
//! `n² × 500ms` before retry `n`. If every attempt fails and a different
//! fallback backend is configured, the fallback gets the same budget.
//! Client errors other than 408 and 429 use up a backend's budget after one
//! attempt. A failed call reports [`ModelError::RetriesExhausted`].
//! Streaming and embedding calls are single-attempt.

pub mod backend;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod structured;
pub mod types;

#[cfg(any(feature = "openai", feature = "anthropic", feature = "ollama"))]
mod http;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicBackend;
pub use backend::Backend;
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use context::{Interrupted, RequestContext};
pub use cost::estimate_cost;
pub use error::{ModelError, Result};
pub use gateway::{Gateway, GatewayBuilder, RetryPolicy};
pub use mock::MockBackend;
#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;
pub use structured::{SchemaField, StructuredOutputError, StructuredPrompt};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse,
    ModelInfo, ModelKind, Role, StreamEvent, Usage,
};

// Re-exported so callers can build contexts without a direct dependency.
pub use tokio_util::sync::CancellationToken;
