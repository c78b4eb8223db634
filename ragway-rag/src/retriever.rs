//! Query embedding plus vector store lookup.

use std::sync::Arc;

use ragway_model::RequestContext;
use tracing::debug;

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::vectorstore::{SearchOptions, VectorStore};

/// Parameters for one retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieveOptions {
    /// Maximum number of results.
    pub top_k: usize,
    /// Score floor applied by the store. Zero disables it.
    pub min_score: f32,
    /// Use hybrid vector plus keyword search.
    pub hybrid: bool,
}

impl RetrieveOptions {
    /// Plain similarity retrieval of `top_k` results.
    pub fn new(top_k: usize) -> Self {
        Self { top_k, min_score: 0.0, hybrid: false }
    }
}

/// Embeds a query and searches the store with it.
///
/// Results keep the store's order. The tenant scope is taken from the
/// [`RequestContext`].
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    /// Create a retriever over `store`, embedding queries with `embedder`.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Retrieve the chunks of the context's tenant that best match `query`.
    pub async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.embedder.embed_single(ctx, query).await?;
        let search = SearchOptions {
            tenant_id: ctx.tenant_id(),
            top_k: options.top_k,
            min_score: options.min_score,
        };

        let results = if options.hybrid {
            ctx.run(self.store.hybrid_search(query, &embedding, &search)).await??
        } else {
            ctx.run(self.store.similarity_search(&embedding, &search)).await??
        };

        debug!(
            tenant_id = %search.tenant_id,
            hybrid = options.hybrid,
            result_count = results.len(),
            "retrieved chunks"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish_non_exhaustive()
    }
}
