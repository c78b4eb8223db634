//! Grounded answer generation with positional citations.

use std::fmt::Write as _;
use std::sync::Arc;

use ragway_model::{ChatMessage, ChatRequest, Gateway, RequestContext, Usage};
use serde::{Deserialize, Serialize};

use crate::document::{Citation, SearchResult};
use crate::error::Result;

const GROUNDING_PROMPT: &str = "You are a helpful AI assistant. Answer the user's question based on the provided context.
If the context doesn't contain enough information, say so. Always cite which sources you used.
Format citations as [Source N] where N corresponds to the context chunk number.";

/// The answer to a question together with the sources it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Model output.
    pub answer: String,
    /// `citations[i]` is the context entry labelled `[Source i+1]`.
    pub citations: Vec<Citation>,
    /// Model that produced the answer.
    pub model: String,
    /// Backend that served the call.
    pub backend: String,
    /// Token usage of the generation call.
    pub usage: Usage,
    /// Estimated cost in USD.
    pub cost_usd: f64,
}

/// Format context results as numbered sources.
pub fn build_context(results: &[SearchResult]) -> String {
    let mut context = String::new();
    for (i, result) in results.iter().enumerate() {
        let _ = write!(context, "[Source {}] (score: {:.3})\n{}\n\n", i + 1, result.score, result.content);
    }
    context
}

/// Answers a question from retrieved context through the gateway.
#[derive(Debug, Clone)]
pub struct Generator {
    gateway: Arc<Gateway>,
    citation_preview_chars: usize,
}

impl Generator {
    /// Create a generator.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway, citation_preview_chars: 200 }
    }

    /// Set how much chunk text each citation keeps.
    pub fn with_citation_preview_chars(mut self, chars: usize) -> Self {
        self.citation_preview_chars = chars;
        self
    }

    /// Answer `query` from `context` with one chat call.
    ///
    /// An empty `model` uses the gateway default; `backend` overrides the
    /// gateway's backend selection. Citations are built from `context` in
    /// order, whatever the model writes.
    pub async fn generate(
        &self,
        ctx: &RequestContext,
        query: &str,
        context: &[SearchResult],
        model: &str,
        backend: Option<&str>,
    ) -> Result<GenerateResponse> {
        let mut request = ChatRequest::new(
            model,
            vec![
                ChatMessage::system(GROUNDING_PROMPT),
                ChatMessage::user(format!("Context:\n{}\n\nQuestion: {query}", build_context(context))),
            ],
        );
        request.backend = backend.map(str::to_string);

        let response = self.gateway.chat(ctx, request).await?;

        let citations = context
            .iter()
            .map(|result| Citation::from_result(result, self.citation_preview_chars))
            .collect();

        Ok(GenerateResponse {
            answer: response.content,
            citations,
            model: response.model,
            backend: response.backend,
            usage: response.usage,
            cost_usd: response.cost_usd,
        })
    }
}
