//! Data types for chunks, search results and citations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored segment of a document with its vector embedding.
///
/// Chunks are immutable once upserted; re-ingesting a document supersedes
/// its chunks instead of mutating them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: Uuid,
    /// The document this chunk was cut from.
    pub document_id: Uuid,
    /// The tenant that owns the document.
    pub tenant_id: Uuid,
    /// Zero-based position within the document.
    pub index: usize,
    /// The text content of the chunk.
    pub content: String,
    /// The vector embedding for this chunk's text.
    pub embedding: Vec<f32>,
    /// Estimated token count of `content`.
    pub token_count: usize,
    /// Free-form key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A retrieved chunk paired with a relevance score.
///
/// Scores are only comparable within one result set: cosine similarity,
/// fused hybrid score or reranked score depending on how the set was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the matched chunk.
    pub chunk_id: Uuid,
    /// The document the chunk belongs to.
    pub document_id: Uuid,
    /// The chunk text.
    pub content: String,
    /// Relevance score (higher is more relevant).
    pub score: f32,
    /// Position of the chunk within its document.
    pub index: usize,
    /// Metadata stored with the chunk.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SearchResult {
    /// Build a result for `chunk` with the given score.
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            content: chunk.content.clone(),
            score,
            index: chunk.index,
            metadata: chunk.metadata.clone(),
        }
    }
}

/// A source reference backing a generated answer.
///
/// `citations[i]` always corresponds to `[Source i+1]` in the prompt the
/// answer was generated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The cited document.
    pub document_id: Uuid,
    /// The cited chunk.
    pub chunk_id: Uuid,
    /// Truncated chunk text.
    pub content: String,
    /// Relevance score of the chunk.
    pub score: f32,
}

impl Citation {
    /// Derive a citation from a context result, truncating its text to
    /// `preview_chars` characters.
    pub fn from_result(result: &SearchResult, preview_chars: usize) -> Self {
        Self {
            document_id: result.document_id,
            chunk_id: result.chunk_id,
            content: preview(&result.content, preview_chars),
            score: result.score,
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}
