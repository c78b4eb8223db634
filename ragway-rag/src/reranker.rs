//! Reranker trait for re-scoring search results.
//!
//! Reranking is an optional quality step. The model-backed rerankers never
//! fail a query because of a bad model answer: on a failed call or an
//! unusable answer they return their input unchanged.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use ragway_model::structured::parse_json;
use ragway_model::{ChatMessage, ChatRequest, Gateway, RequestContext};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::document::{SearchResult, preview};
use crate::error::{RagError, Result};

const LISTWISE_PROMPT: &str = "You are a relevance scoring assistant. Given a query and a list of text chunks,
score each chunk from 0.0 to 1.0 based on how relevant it is to the query.
Return ONLY a JSON array of objects with \"index\" and \"score\" fields. Example:
[{\"index\": 0, \"score\": 0.95}, {\"index\": 1, \"score\": 0.3}]";

const POINTWISE_PROMPT: &str =
    "Rate the relevance of the document to the query on a scale of 0.0 to 1.0. Reply with ONLY the number.";

/// A reranker that re-scores and reorders search results.
///
/// Implementations can use cross-encoder models, LLM-based scoring, or
/// other strategies to improve precision beyond initial vector similarity.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank search results given the original query.
    ///
    /// Returns results in a new order with potentially updated scores.
    async fn rerank(
        &self,
        ctx: &RequestContext,
        query: &str,
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>>;
}

/// A no-op reranker that returns results unchanged.
///
/// Useful as a default when no reranking is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _ctx: &RequestContext,
        _query: &str,
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        Ok(results)
    }
}

/// Sort by score, highest first. Equal scores keep their relative order.
fn sort_descending(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[derive(Debug, Deserialize)]
struct IndexedScore {
    index: usize,
    score: f32,
}

/// Scores the whole candidate list with one generation call.
///
/// The model sees every candidate (truncated to a preview) and answers with
/// a JSON array of `{"index", "score"}` objects. Candidates the answer does
/// not mention keep their retrieval score.
#[derive(Debug, Clone)]
pub struct LlmReranker {
    gateway: Arc<Gateway>,
    model: String,
    preview_chars: usize,
}

impl LlmReranker {
    /// Create a reranker that uses `model` through `gateway`.
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into(), preview_chars: 500 }
    }

    /// Set how many characters of each candidate the model sees.
    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    fn prompt(&self, query: &str, results: &[SearchResult]) -> String {
        let mut chunks = String::new();
        for (i, result) in results.iter().enumerate() {
            let _ = write!(chunks, "[{i}] {}\n\n", preview(&result.content, self.preview_chars));
        }
        format!("Query: {query}\n\nChunks:\n{chunks}")
    }
}

/// Apply model scores to `results`, skipping indices that name no candidate.
/// Returns the reordered results and the number of skipped entries.
fn apply_scores(mut results: Vec<SearchResult>, scores: &[IndexedScore]) -> (Vec<SearchResult>, usize) {
    let mut skipped = 0;
    for entry in scores {
        match results.get_mut(entry.index) {
            Some(result) => result.score = entry.score,
            None => skipped += 1,
        }
    }
    sort_descending(&mut results);
    (results, skipped)
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(
        &self,
        ctx: &RequestContext,
        query: &str,
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let request = ChatRequest::new(
            &self.model,
            vec![ChatMessage::system(LISTWISE_PROMPT), ChatMessage::user(self.prompt(query, &results))],
        )
        .with_temperature(0.0);

        let response = match self.gateway.chat(ctx, request).await {
            Ok(response) => response,
            Err(err) if err.is_interruption() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "rerank call failed, keeping retrieval order");
                return Ok(results);
            }
        };

        let scores: Vec<IndexedScore> = match parse_json(&response.content) {
            Ok(scores) => scores,
            Err(err) => {
                warn!(error = %err, "unparseable rerank scores, keeping retrieval order");
                return Ok(results);
            }
        };

        let (reranked, skipped) = apply_scores(results, &scores);
        if skipped > 0 {
            warn!(candidates = reranked.len(), skipped, "ignoring out-of-range rerank indices");
        }
        debug!(candidates = reranked.len(), scored = scores.len() - skipped, "reranked results");
        Ok(reranked)
    }
}

/// Scores each candidate with its own generation call, cross-encoder style.
///
/// Calls run with at most `concurrency` in flight. A candidate whose call
/// fails or whose answer is not a number in `[0, 1]` keeps its score.
#[derive(Debug, Clone)]
pub struct PointwiseReranker {
    gateway: Arc<Gateway>,
    model: String,
    preview_chars: usize,
    concurrency: usize,
}

impl PointwiseReranker {
    /// Create a reranker that uses `model` through `gateway`.
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into(), preview_chars: 1000, concurrency: 4 }
    }

    /// Set the maximum number of scoring calls in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set how many characters of each candidate the model sees.
    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    async fn score(&self, ctx: &RequestContext, query: &str, content: &str) -> Result<Option<f32>> {
        let request = ChatRequest::new(
            &self.model,
            vec![
                ChatMessage::system(POINTWISE_PROMPT),
                ChatMessage::user(format!(
                    "Query: {query}\n\nDocument: {}",
                    preview(content, self.preview_chars)
                )),
            ],
        )
        .with_temperature(0.0);

        match self.gateway.chat(ctx, request).await {
            Ok(response) => Ok(parse_unit_score(&response.content)),
            Err(err) if err.is_interruption() => Err(RagError::from(err)),
            Err(err) => {
                debug!(error = %err, "pointwise score failed");
                Ok(None)
            }
        }
    }
}

/// Parse a relevance score, accepting only numbers in `[0, 1]`.
fn parse_unit_score(text: &str) -> Option<f32> {
    text.trim().parse::<f32>().ok().filter(|score| (0.0..=1.0).contains(score))
}

#[async_trait]
impl Reranker for PointwiseReranker {
    async fn rerank(
        &self,
        ctx: &RequestContext,
        query: &str,
        results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let contents: Vec<String> = results.iter().map(|result| result.content.clone()).collect();
        let scores: Vec<Result<Option<f32>>> = futures::stream::iter(contents)
            .map(|content| async move { self.score(ctx, query, &content).await })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut reranked = results;
        for (result, score) in reranked.iter_mut().zip(scores) {
            if let Some(score) = score? {
                result.score = score;
            }
        }
        sort_descending(&mut reranked);
        Ok(reranked)
    }
}
