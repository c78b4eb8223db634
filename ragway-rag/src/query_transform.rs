//! Query transformation: multi-query rewriting and hypothetical documents.
//!
//! Both transformations are best-effort. A failed generation call never
//! fails the query that asked for it; the caller falls back to retrieving
//! with the original text. Only cancellation and deadline errors are
//! propagated.

use std::sync::Arc;

use async_trait::async_trait;
use ragway_model::{ChatMessage, ChatRequest, Gateway, RequestContext};
use tracing::warn;

use crate::error::{RagError, Result};

const REWRITE_PROMPT: &str = "You are a search query optimizer. Given a user question, generate 3 alternative \
versions of the question that would help retrieve relevant documents from a vector database.
Each alternative should approach the question from a different angle.
Return ONLY the 3 questions, one per line, no numbering or bullets.";

const HYDE_PROMPT: &str = "Write a short, factual paragraph that would perfectly answer the following question.
Write as if you are writing a passage from a reference document. Do not mention the question itself.
Be specific and detailed.";

/// Expands a query into several phrasings for multi-query retrieval.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    /// Return the query variants to retrieve with. The original query is
    /// always the first element.
    async fn rewrite(&self, ctx: &RequestContext, query: &str) -> Result<Vec<String>>;
}

/// Asks a chat model for three alternative phrasings of the question.
#[derive(Debug, Clone)]
pub struct LlmQueryRewriter {
    gateway: Arc<Gateway>,
    model: String,
}

impl LlmQueryRewriter {
    /// Create a rewriter that uses `model` through `gateway`.
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into() }
    }
}

/// Original query first, then each distinct non-empty line of `output`.
pub fn query_variants(query: &str, output: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !variants.iter().any(|existing| existing == line) {
            variants.push(line.to_string());
        }
    }
    variants
}

#[async_trait]
impl QueryRewriter for LlmQueryRewriter {
    async fn rewrite(&self, ctx: &RequestContext, query: &str) -> Result<Vec<String>> {
        let request = ChatRequest::new(
            &self.model,
            vec![ChatMessage::system(REWRITE_PROMPT), ChatMessage::user(query)],
        )
        .with_temperature(0.7);

        match self.gateway.chat(ctx, request).await {
            Ok(response) => Ok(query_variants(query, &response.content)),
            Err(err) if err.is_interruption() => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "query rewrite failed, using original query");
                Ok(vec![query.to_string()])
            }
        }
    }
}

/// Generates a hypothetical answer passage whose embedding is used for
/// retrieval in place of the question's.
#[derive(Debug, Clone)]
pub struct HydeGenerator {
    gateway: Arc<Gateway>,
    model: String,
}

impl HydeGenerator {
    /// Create a generator that uses `model` through `gateway`.
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>) -> Self {
        Self { gateway, model: model.into() }
    }

    /// Write a short passage that would answer `query`. The result is
    /// trimmed and may be empty.
    pub async fn generate(&self, ctx: &RequestContext, query: &str) -> Result<String> {
        let request = ChatRequest::new(
            &self.model,
            vec![ChatMessage::system(HYDE_PROMPT), ChatMessage::user(query)],
        )
        .with_temperature(0.0);

        let response = self.gateway.chat(ctx, request).await.map_err(RagError::from)?;
        Ok(response.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use ragway_model::MockBackend;
    use uuid::Uuid;

    use super::*;

    fn gateway(backend: &MockBackend) -> Arc<Gateway> {
        Arc::new(Gateway::builder().backend(Arc::new(backend.clone())).max_retries(0).build().unwrap())
    }

    #[test]
    fn variants_keep_original_first_and_drop_repeats() {
        let output = "  What is Rust?\n\nHow does Rust work?\nwhat is rust\nHow does Rust work?\n";
        assert_eq!(
            query_variants("What is Rust?", output),
            vec!["What is Rust?", "How does Rust work?", "what is rust"]
        );
    }

    #[tokio::test]
    async fn rewrite_degrades_to_original_query() {
        let backend = MockBackend::failing("mock");
        let rewriter = LlmQueryRewriter::new(gateway(&backend), "gpt-4o-mini");

        let variants = rewriter.rewrite(&RequestContext::new(Uuid::new_v4()), "q").await.unwrap();

        assert_eq!(variants, vec!["q"]);
    }

    #[tokio::test]
    async fn rewrite_uses_warm_temperature() {
        let backend = MockBackend::new("mock").with_default_reply("a\nb\nc");
        let rewriter = LlmQueryRewriter::new(gateway(&backend), "gpt-4o-mini");

        let variants = rewriter.rewrite(&RequestContext::new(Uuid::new_v4()), "q").await.unwrap();

        assert_eq!(variants, vec!["q", "a", "b", "c"]);
        assert_eq!(backend.requests()[0].temperature, Some(0.7));
    }

    #[tokio::test]
    async fn rewrite_propagates_cancellation() {
        let backend = MockBackend::new("mock");
        let rewriter = LlmQueryRewriter::new(gateway(&backend), "gpt-4o-mini");
        let ctx = RequestContext::new(Uuid::new_v4());
        ctx.cancel();

        let err = rewriter.rewrite(&ctx, "q").await.unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }

    #[tokio::test]
    async fn hyde_trims_passage() {
        let backend = MockBackend::new("mock").with_default_reply("  Rust is a language.\n");
        let hyde = HydeGenerator::new(gateway(&backend), "gpt-4o-mini");

        let passage = hyde.generate(&RequestContext::new(Uuid::new_v4()), "what is rust").await.unwrap();

        assert_eq!(passage, "Rust is a language.");
        assert_eq!(backend.requests()[0].temperature, Some(0.0));
    }
}
