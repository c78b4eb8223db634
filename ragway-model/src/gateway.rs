//! Backend registry with retry and fallback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::context::RequestContext;
use crate::cost::{estimate_cost, estimate_usage_cost};
use crate::error::{ModelError, Result};
use crate::types::{
    ChatRequest, ChatResponse, ChatStream, EmbeddingRequest, EmbeddingResponse, ModelInfo,
    ModelKind,
};

/// Retry policy for [`Gateway::chat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Unit of the quadratic backoff.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `retry² × base_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry.saturating_mul(retry))
    }
}

/// Routes chat and embedding calls to configured [`Backend`]s.
///
/// The registry is immutable after construction, so one gateway is shared
/// (behind an `Arc`) by every concurrent request.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ragway_model::{Gateway, MockBackend};
///
/// let gateway = Gateway::builder()
///     .backend(Arc::new(MockBackend::new("primary")))
///     .backend(Arc::new(MockBackend::new("secondary")))
///     .default_backend("primary")
///     .fallback_backend("secondary")
///     .build()
///     .unwrap();
/// assert_eq!(gateway.default_backend(), "primary");
/// ```
pub struct Gateway {
    backends: HashMap<String, Arc<dyn Backend>>,
    default_backend: String,
    fallback_backend: Option<String>,
    fallback_model: Option<String>,
    default_model: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        f.debug_struct("Gateway")
            .field("backends", &names)
            .field("default_backend", &self.default_backend)
            .field("fallback_backend", &self.fallback_backend)
            .field("fallback_model", &self.fallback_model)
            .field("default_model", &self.default_model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Gateway {
    /// Start building a gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Name of the backend used when a request names none.
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Name of the fallback backend, if configured.
    pub fn fallback_backend(&self) -> Option<&str> {
        self.fallback_backend.as_deref()
    }

    /// Model used when a request leaves the model empty.
    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    /// The retry policy applied by [`chat`](Self::chat).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Look up a registered backend.
    pub fn backend(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.backends.get(name).cloned().ok_or_else(|| ModelError::NotConfigured(name.to_string()))
    }

    /// Every model advertised by every backend, sorted by backend then model.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .backends
            .values()
            .flat_map(|backend| {
                let name = backend.name().to_string();
                backend.models().into_iter().map(move |model| ModelInfo {
                    backend: name.clone(),
                    kind: ModelKind::of(&model),
                    model,
                })
            })
            .collect();
        models.sort_by(|a, b| a.backend.cmp(&b.backend).then_with(|| a.model.cmp(&b.model)));
        models
    }

    /// Run a chat completion with retries, then fallback.
    ///
    /// The selected backend gets `1 + max_retries` attempts with quadratic
    /// backoff between them. If every attempt fails and a distinct fallback
    /// backend is configured, the fallback gets the same budget. The final
    /// failure is [`ModelError::RetriesExhausted`] wrapping the last cause.
    ///
    /// Cancellation and deadline expiry end the call immediately, including
    /// during a backoff sleep, and are never retried. Errors that cannot
    /// succeed on retry ([`ModelError::is_retryable`]) end the attempts
    /// against that backend early, but still move on to the fallback.
    pub async fn chat(&self, ctx: &RequestContext, mut request: ChatRequest) -> Result<ChatResponse> {
        if request.model.is_empty() {
            if let Some(model) = &self.default_model {
                request.model = model.clone();
            }
        }
        let primary_name = request.backend.clone().unwrap_or_else(|| self.default_backend.clone());
        let primary = self.backend(&primary_name)?;

        let err = match self.chat_with_retries(ctx, primary.as_ref(), &request).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        if err.is_interruption() {
            return Err(err);
        }

        let Some((fallback_name, fallback)) = self.fallback_for(&primary_name) else {
            return Err(err);
        };
        warn!(
            primary = %primary_name,
            fallback = %fallback_name,
            error = %err,
            "primary backend failed, trying fallback"
        );

        let mut fallback_request = request;
        fallback_request.backend = Some(fallback_name.to_string());
        if let Some(model) = &self.fallback_model {
            fallback_request.model = model.clone();
        }
        self.chat_with_retries(ctx, fallback.as_ref(), &fallback_request).await
    }

    /// Start a streaming chat completion. Single attempt, no fallback.
    pub async fn chat_stream(
        &self,
        ctx: &RequestContext,
        mut request: ChatRequest,
    ) -> Result<ChatStream> {
        if request.model.is_empty() {
            if let Some(model) = &self.default_model {
                request.model = model.clone();
            }
        }
        let name = request.backend.clone().unwrap_or_else(|| self.default_backend.clone());
        let backend = self.backend(&name)?;
        ctx.run(backend.chat_completion_stream(ctx, &request)).await?
    }

    /// Embed a batch of texts. Single attempt, no fallback.
    pub async fn embed(
        &self,
        ctx: &RequestContext,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let name = request.backend.clone().unwrap_or_else(|| self.default_backend.clone());
        let backend = self.backend(&name)?;

        let mut response = ctx.run(backend.generate_embedding(ctx, &request)).await??;
        response.cost_usd = estimate_cost(&response.model, response.tokens, 0);
        Ok(response)
    }

    /// Run independent chat calls with at most `concurrency` in flight.
    ///
    /// Results come back in request order, regardless of completion order.
    pub async fn chat_many(
        &self,
        ctx: &RequestContext,
        requests: Vec<ChatRequest>,
        concurrency: usize,
    ) -> Vec<Result<ChatResponse>> {
        futures::stream::iter(requests)
            .map(|request| self.chat(ctx, request))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    fn fallback_for(&self, primary: &str) -> Option<(&str, Arc<dyn Backend>)> {
        let name = self.fallback_backend.as_deref().filter(|name| *name != primary)?;
        self.backends.get(name).map(|backend| (name, Arc::clone(backend)))
    }

    async fn chat_with_retries(
        &self,
        ctx: &RequestContext,
        backend: &dyn Backend,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let mut attempts = 0u32;
        loop {
            if attempts > 0 {
                let delay = self.retry.backoff(attempts);
                debug!(
                    backend = backend.name(),
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying chat completion"
                );
                ctx.sleep(delay).await?;
            }
            attempts += 1;

            let started = Instant::now();
            match ctx.run(backend.chat_completion(ctx, request)).await? {
                Ok(mut response) => {
                    if response.backend.is_empty() {
                        response.backend = backend.name().to_string();
                    }
                    if response.model.is_empty() {
                        response.model = request.model.clone();
                    }
                    // Backends may answer with a dated snapshot id; price the requested model.
                    let priced = if request.model.is_empty() { &response.model } else { &request.model };
                    response.cost_usd = estimate_usage_cost(priced, &response.usage);
                    response.latency_ms = started.elapsed().as_millis() as u64;
                    return Ok(response);
                }
                Err(err) if err.is_interruption() => return Err(err),
                Err(err) => {
                    debug!(backend = backend.name(), attempt = attempts, error = %err, "chat attempt failed");
                    if !err.is_retryable() || attempts > self.retry.max_retries {
                        return Err(ModelError::RetriesExhausted {
                            backend: backend.name().to_string(),
                            attempts,
                            source: Box::new(err),
                        });
                    }
                }
            }
        }
    }
}

/// Builder for [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    backends: HashMap<String, Arc<dyn Backend>>,
    default_backend: Option<String>,
    fallback_backend: Option<String>,
    fallback_model: Option<String>,
    default_model: Option<String>,
    retry: RetryPolicy,
}

impl GatewayBuilder {
    /// Register a backend under its own name. A later backend with the same
    /// name replaces the earlier one.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    /// Backend used when a request names none.
    pub fn default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    /// Backend tried after the selected backend exhausts its retries.
    pub fn fallback_backend(mut self, name: impl Into<String>) -> Self {
        self.fallback_backend = Some(name.into());
        self
    }

    /// Model substituted for fallback attempts.
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    /// Model used when a request leaves the model empty.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Number of additional attempts after the first.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Unit of the quadratic backoff.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the gateway.
    ///
    /// Without an explicit default, a gateway with exactly one backend uses
    /// it as the default. The default and fallback backends must be registered.
    pub fn build(self) -> Result<Gateway> {
        let default_backend = match self.default_backend {
            Some(name) => name,
            None if self.backends.len() == 1 => {
                self.backends.keys().next().cloned().unwrap_or_default()
            }
            None => {
                return Err(ModelError::Config(
                    "a default backend is required when several backends are registered"
                        .to_string(),
                ));
            }
        };
        if !self.backends.contains_key(&default_backend) {
            return Err(ModelError::Config(format!(
                "default backend '{default_backend}' is not configured"
            )));
        }
        if let Some(fallback) = &self.fallback_backend {
            if !self.backends.contains_key(fallback) {
                return Err(ModelError::Config(format!(
                    "fallback backend '{fallback}' is not configured"
                )));
            }
        }

        Ok(Gateway {
            backends: self.backends,
            default_backend,
            fallback_backend: self.fallback_backend,
            fallback_model: self.fallback_model,
            default_model: self.default_model,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_quadratic() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4500));
    }

    #[test]
    fn build_rejects_unregistered_default() {
        let err = Gateway::builder().default_backend("openai").build().unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }
}
