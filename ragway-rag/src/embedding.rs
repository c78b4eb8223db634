//! Batched text embedding through the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use ragway_model::{EmbeddingRequest, Gateway, RequestContext};
use tracing::debug;

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// A provider that turns texts into vector embeddings.
///
/// `embed` returns exactly one vector per input, in input order. The
/// default [`embed_single`](EmbeddingProvider::embed_single) delegates to
/// [`embed`](EmbeddingProvider::embed) with a one-element batch.
///
/// # Example
///
/// ```rust,ignore
/// use ragway_rag::EmbeddingProvider;
///
/// let vectors = embedder.embed(&ctx, &texts).await?;
/// assert_eq!(vectors.len(), texts.len());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, preserving order.
    async fn embed(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one text.
    async fn embed_single(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        self.embed(ctx, &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(RagError::NoEmbeddingReturned)
    }
}

/// Embeds texts through a [`Gateway`], splitting large inputs into
/// sequential batches.
///
/// Batches run one after another so that a failure stops the remaining
/// calls. Any failed batch fails the whole request.
#[derive(Debug, Clone)]
pub struct GatewayEmbedder {
    gateway: Arc<Gateway>,
    model: String,
    backend: Option<String>,
    batch_size: usize,
}

impl GatewayEmbedder {
    /// Create an embedder using `model` on the gateway's default backend.
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into(), backend: None, batch_size: 100 }
    }

    /// Create an embedder from the pipeline configuration.
    pub fn from_config(gateway: Arc<Gateway>, config: &RagConfig) -> Self {
        Self {
            gateway,
            model: config.embedding_model.clone(),
            backend: config.embedding_backend.clone(),
            batch_size: config.embedding_batch_size.max(1),
        }
    }

    /// Route embedding calls to `backend`.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the maximum number of texts per call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The model used for embeddings.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingProvider for GatewayEmbedder {
    async fn embed(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch, inputs) in texts.chunks(self.batch_size).enumerate() {
            let mut request = EmbeddingRequest::new(&self.model, inputs.to_vec());
            request.backend = self.backend.clone();

            let response = self.gateway.embed(ctx, request).await.map_err(|source| {
                if source.is_interruption() {
                    RagError::from(source)
                } else {
                    RagError::EmbeddingBatch { batch, source }
                }
            })?;

            if response.embeddings.len() != inputs.len() {
                return Err(RagError::EmbeddingCountMismatch {
                    batch,
                    expected: inputs.len(),
                    actual: response.embeddings.len(),
                });
            }

            debug!(batch, size = inputs.len(), tokens = response.tokens, "embedded batch");
            vectors.extend(response.embeddings);
        }

        Ok(vectors)
    }

    async fn embed_single(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        match self.embed(ctx, &[text.to_string()]).await {
            Err(RagError::EmbeddingCountMismatch { actual: 0, .. }) => Err(RagError::NoEmbeddingReturned),
            result => result?.into_iter().next().ok_or(RagError::NoEmbeddingReturned),
        }
    }
}
