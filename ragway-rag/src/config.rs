//! Configuration for the RAG pipeline.

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkOptions, ChunkStrategy};
use crate::error::{RagError, Result};

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Chunking used when an ingest request carries no options.
    pub chunking: ChunkOptions,
    /// Results retrieved for a query when the request asks for `top_k <= 0`.
    pub query_top_k: usize,
    /// Results returned by a search when the request asks for `top_k <= 0`.
    pub search_top_k: usize,
    /// Model used for document and query embeddings.
    pub embedding_model: String,
    /// Backend used for embeddings. `None` uses the gateway default.
    pub embedding_backend: Option<String>,
    /// Maximum texts per embedding call.
    pub embedding_batch_size: usize,
    /// Model used for rewriting, HyDE and reranking.
    pub assistant_model: String,
    /// Characters of each candidate shown to the reranker.
    pub rerank_preview_chars: usize,
    /// Characters of chunk text kept in each citation.
    pub citation_preview_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkOptions::default(),
            query_top_k: 5,
            search_top_k: 10,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_backend: None,
            embedding_batch_size: 100,
            assistant_model: "gpt-4o-mini".to_string(),
            rerank_preview_chars: 500,
            citation_preview_chars: 200,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the default chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunking.size = size;
        self
    }

    /// Set the default overlap between fixed-size chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunking.overlap = overlap;
        self
    }

    /// Set the default chunking strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunking.strategy = strategy;
        self
    }

    /// Set the default number of results for queries.
    pub fn query_top_k(mut self, k: usize) -> Self {
        self.config.query_top_k = k;
        self
    }

    /// Set the default number of results for searches.
    pub fn search_top_k(mut self, k: usize) -> Self {
        self.config.search_top_k = k;
        self
    }

    /// Set the embedding model.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Route embeddings to a specific backend.
    pub fn embedding_backend(mut self, backend: impl Into<String>) -> Self {
        self.config.embedding_backend = Some(backend.into());
        self
    }

    /// Set the maximum number of texts per embedding call.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the model used for query transformation and reranking.
    pub fn assistant_model(mut self, model: impl Into<String>) -> Self {
        self.config.assistant_model = model.into();
        self
    }

    /// Set how much candidate text the reranker sees.
    pub fn rerank_preview_chars(mut self, chars: usize) -> Self {
        self.config.rerank_preview_chars = chars;
        self
    }

    /// Set how much chunk text each citation keeps.
    pub fn citation_preview_chars(mut self, chars: usize) -> Self {
        self.config.citation_preview_chars = chars;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - either default `top_k` is zero
    /// - `embedding_batch_size == 0`
    /// - the embedding or assistant model is empty
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunking.size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.chunking.overlap >= config.chunking.size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunking.overlap, config.chunking.size
            )));
        }
        if config.query_top_k == 0 || config.search_top_k == 0 {
            return Err(RagError::Config("top_k defaults must be greater than zero".to_string()));
        }
        if config.embedding_batch_size == 0 {
            return Err(RagError::Config("embedding_batch_size must be greater than zero".to_string()));
        }
        if config.embedding_model.trim().is_empty() || config.assistant_model.trim().is_empty() {
            return Err(RagError::Config("model names must not be empty".to_string()));
        }
        Ok(config)
    }
}
