//! Error types for the `ragway-rag` crate.

use ragway_model::{Interrupted, ModelError};
use thiserror::Error;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking produced nothing to index.
    #[error("no chunks generated from content")]
    NoChunks,

    /// One embedding batch failed; no partial results are returned.
    #[error("embedding batch {batch} failed: {source}")]
    EmbeddingBatch {
        /// Zero-based index of the failing batch.
        batch: usize,
        /// The gateway error.
        #[source]
        source: ModelError,
    },

    /// The backend returned a different number of vectors than inputs.
    #[error("embedding batch {batch} returned {actual} vectors for {expected} inputs")]
    EmbeddingCountMismatch {
        /// Zero-based index of the batch.
        batch: usize,
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },

    /// A single-text embedding call succeeded but produced no vector.
    #[error("no embedding returned")]
    NoEmbeddingReturned,

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A gateway call in the answer path failed.
    #[error(transparent)]
    Model(ModelError),
}

impl RagError {
    /// Whether the error came from the caller's cancellation or deadline.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<ModelError> for RagError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Cancelled => Self::Cancelled,
            ModelError::DeadlineExceeded => Self::DeadlineExceeded,
            other => Self::Model(other),
        }
    }
}

impl From<Interrupted> for RagError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
