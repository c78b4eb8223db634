//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;
use uuid::Uuid;

use crate::document::{Chunk, SearchResult};
use crate::error::Result;

/// Weight of vector similarity in a hybrid score.
pub const VECTOR_WEIGHT: f32 = 0.7;
/// Weight of keyword relevance in a hybrid score.
pub const KEYWORD_WEIGHT: f32 = 0.3;

/// Combine vector and keyword scores into one hybrid score.
pub fn hybrid_score(vector: f32, keyword: f32) -> f32 {
    VECTOR_WEIGHT * vector + KEYWORD_WEIGHT * keyword
}

/// Parameters shared by similarity and hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Only chunks owned by this tenant are considered.
    pub tenant_id: Uuid,
    /// Maximum number of results.
    pub top_k: usize,
    /// Results scoring below this are dropped. Zero disables the filter.
    pub min_score: f32,
}

impl SearchOptions {
    /// Search `tenant_id`'s chunks for the `top_k` best matches.
    pub fn new(tenant_id: Uuid, top_k: usize) -> Self {
        Self { tenant_id, top_k, min_score: 0.0 }
    }

    /// Set the minimum score.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Whether `score` passes the minimum-score filter.
    pub fn accepts(&self, score: f32) -> bool {
        self.min_score <= 0.0 || score >= self.min_score
    }
}

/// Which chunks a delete removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteFilter {
    /// Tenant whose chunks are removed.
    pub tenant_id: Uuid,
    /// Restrict the delete to one document. `None` removes every chunk of the tenant.
    pub document_id: Option<Uuid>,
}

impl DeleteFilter {
    /// Remove one document's chunks.
    pub fn document(tenant_id: Uuid, document_id: Uuid) -> Self {
        Self { tenant_id, document_id: Some(document_id) }
    }

    /// Remove all of a tenant's chunks.
    pub fn tenant(tenant_id: Uuid) -> Self {
        Self { tenant_id, document_id: None }
    }

    /// Whether `chunk` falls under this filter.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        chunk.tenant_id == self.tenant_id
            && self.document_id.is_none_or(|document_id| chunk.document_id == document_id)
    }
}

/// A storage backend for chunk embeddings with tenant-scoped search.
///
/// Upserts are keyed by chunk id. Searches never return chunks of another
/// tenant and return results in descending score order.
///
/// # Example
///
/// ```rust,ignore
/// use ragway_rag::{InMemoryVectorStore, SearchOptions, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert(&chunks).await?;
/// let results = store.similarity_search(&query_embedding, &SearchOptions::new(tenant, 5)).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks. Chunks must have embeddings set.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Find the chunks most similar to `embedding`.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>;

    /// Rank chunks by a weighted blend of vector similarity and keyword
    /// relevance to `query`.
    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>;

    /// Remove the chunks matched by `filter`. Returns how many were removed.
    async fn delete(&self, filter: &DeleteFilter) -> Result<u64>;
}
