//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and single-process use such as the CLI.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{DeleteFilter, SearchOptions, VectorStore, hybrid_score};

/// An in-memory vector store using cosine similarity for search.
///
/// Chunks are keyed by chunk id; every search scans only the chunks of the
/// requesting tenant.
///
/// # Example
///
/// ```rust,ignore
/// use ragway_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert(&chunks).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<Uuid, Chunk>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks across all tenants.
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Whether the store holds no chunks.
    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }

    /// Score every chunk of the tenant with `score`, then filter, sort and cut.
    async fn ranked<F>(&self, options: &SearchOptions, score: F) -> Vec<SearchResult>
    where
        F: Fn(&Chunk) -> f32,
    {
        let chunks = self.chunks.read().await;
        let mut scored: Vec<SearchResult> = chunks
            .values()
            .filter(|chunk| chunk.tenant_id == options.tenant_id)
            .map(|chunk| SearchResult::from_chunk(chunk, score(chunk)))
            .filter(|result| options.accepts(result.score))
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.top_k);
        scored
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of the distinct query terms that occur in `content`.
pub fn keyword_score(query: &str, content: &str) -> f32 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = terms(content);
    let hits = query_terms.iter().filter(|term| content_terms.contains(*term)).count();
    hits as f32 / query_terms.len() as f32
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if let Some(chunk) = chunks.iter().find(|chunk| chunk.embedding.is_empty()) {
            return Err(RagError::VectorStore {
                backend: "InMemory".to_string(),
                message: format!("chunk '{}' has no embedding", chunk.id),
            });
        }
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        Ok(self.ranked(options, |chunk| cosine_similarity(&chunk.embedding, embedding)).await)
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        Ok(self
            .ranked(options, |chunk| {
                hybrid_score(
                    cosine_similarity(&chunk.embedding, embedding),
                    keyword_score(query, &chunk.content),
                )
            })
            .await)
    }

    async fn delete(&self, filter: &DeleteFilter) -> Result<u64> {
        let mut store = self.chunks.write().await;
        let before = store.len();
        store.retain(|_, chunk| !filter.matches(chunk));
        Ok((before - store.len()) as u64)
    }
}
