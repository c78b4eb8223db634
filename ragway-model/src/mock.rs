//! A scripted in-process backend.
//!
//! [`MockBackend`] answers chat and embedding calls from a script instead of
//! the network. Replies are taken from a queue first, then from a handler
//! closure, then from a fixed default. Every call is counted and recorded so
//! tests can assert on retry and batching behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::error::{ModelError, Result};
use crate::types::{
    ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse, StreamEvent,
    Usage, stream_channel,
};

/// Dimension of the default bag-of-words embedding.
pub const MOCK_EMBEDDING_DIM: usize = 16;

type ChatHandler = Arc<dyn Fn(&ChatRequest) -> Result<String> + Send + Sync>;
type EmbedHandler = Arc<dyn Fn(&EmbeddingRequest) -> Result<Vec<Vec<f32>>> + Send + Sync>;

/// Scripted backend for tests and offline runs.
///
/// # Example
///
/// ```rust
/// use ragway_model::MockBackend;
///
/// let backend = MockBackend::new("primary")
///     .with_reply("first answer")
///     .with_default_reply("later answers");
/// assert_eq!(backend.chat_calls(), 0);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    models: Vec<String>,
    default_reply: String,
    always_fail: bool,
    usage: Usage,
    chat_queue: Arc<Mutex<VecDeque<Result<String>>>>,
    chat_handler: Option<ChatHandler>,
    embed_handler: Option<EmbedHandler>,
    chat_calls: Arc<AtomicU32>,
    stream_calls: Arc<AtomicU32>,
    embed_calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    embed_requests: Arc<Mutex<Vec<EmbeddingRequest>>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("name", &self.name)
            .field("models", &self.models)
            .field("always_fail", &self.always_fail)
            .finish_non_exhaustive()
    }
}

impl MockBackend {
    /// A backend named `name` that answers every chat with `"mock response"`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: vec!["mock-chat".to_string(), "mock-embed".to_string()],
            default_reply: "mock response".to_string(),
            always_fail: false,
            usage: Usage::new(10, 5),
            chat_queue: Arc::default(),
            chat_handler: None,
            embed_handler: None,
            chat_calls: Arc::default(),
            stream_calls: Arc::default(),
            embed_calls: Arc::default(),
            requests: Arc::default(),
            embed_requests: Arc::default(),
        }
    }

    /// A backend whose every chat and embedding call fails with a retryable error.
    pub fn failing(name: impl Into<String>) -> Self {
        Self { always_fail: true, ..Self::new(name) }
    }

    /// Advertise these model ids.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Queue one successful chat reply.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        lock(&self.chat_queue).push_back(Ok(content.into()));
        self
    }

    /// Queue one chat failure.
    pub fn with_error(self, error: ModelError) -> Self {
        lock(&self.chat_queue).push_back(Err(error));
        self
    }

    /// Reply used once the queue is empty and no handler is set.
    pub fn with_default_reply(mut self, content: impl Into<String>) -> Self {
        self.default_reply = content.into();
        self
    }

    /// Compute chat replies from the request once the queue is empty.
    pub fn with_chat_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String> + Send + Sync + 'static,
    {
        self.chat_handler = Some(Arc::new(handler));
        self
    }

    /// Compute embeddings from the request instead of the bag-of-words default.
    pub fn with_embedding_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&EmbeddingRequest) -> Result<Vec<Vec<f32>>> + Send + Sync + 'static,
    {
        self.embed_handler = Some(Arc::new(handler));
        self
    }

    /// Usage reported on every successful chat.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Number of `chat_completion` calls received.
    pub fn chat_calls(&self) -> u32 {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Number of `chat_completion_stream` calls received.
    pub fn stream_calls(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of `generate_embedding` calls received.
    pub fn embed_calls(&self) -> u32 {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Chat requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    /// Embedding requests received so far, in arrival order.
    pub fn embedding_requests(&self) -> Vec<EmbeddingRequest> {
        lock(&self.embed_requests).clone()
    }

    fn transient_error(&self) -> ModelError {
        ModelError::Request { backend: self.name.clone(), message: "mock failure".to_string() }
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        if self.always_fail {
            return Err(self.transient_error());
        }
        if let Some(queued) = lock(&self.chat_queue).pop_front() {
            return queued;
        }
        match &self.chat_handler {
            Some(handler) => handler(request),
            None => Ok(self.default_reply.clone()),
        }
    }
}

/// Deterministic embedding: each lowercase word bumps one hashed dimension,
/// then the vector is L2-normalised. Texts sharing words point the same way.
pub fn bag_of_words_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_EMBEDDING_DIM];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(2_166_136_261u32, |h, b| (h ^ u32::from(b)).wrapping_mul(16_777_619));
        vector[hash as usize % MOCK_EMBEDDING_DIM] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        ctx.check()?;

        let content = self.next_reply(request)?;
        Ok(ChatResponse {
            id: Some(format!("mock-{}", self.chat_calls())),
            backend: self.name.clone(),
            model: request.model.clone(),
            content,
            usage: self.usage,
            cost_usd: 0.0,
            latency_ms: 0,
        })
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        ctx.check()?;

        let content = self.next_reply(request)?;
        let usage = self.usage;
        let (tx, stream) = stream_channel();
        tokio::spawn(async move {
            for word in content.split_inclusive(' ') {
                if tx.send(StreamEvent::Delta(word.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Done { usage }).await;
        });
        Ok(stream)
    }

    async fn generate_embedding(
        &self,
        ctx: &RequestContext,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.embed_requests).push(request.clone());
        ctx.check()?;

        if self.always_fail {
            return Err(self.transient_error());
        }
        let embeddings = match &self.embed_handler {
            Some(handler) => handler(request)?,
            None => request.input.iter().map(|text| bag_of_words_embedding(text)).collect(),
        };
        let tokens = request.input.iter().map(|t| t.split_whitespace().count() as u32).sum();

        Ok(EmbeddingResponse {
            backend: self.name.clone(),
            model: request.model.clone(),
            embeddings,
            tokens,
            cost_usd: 0.0,
        })
    }
}
