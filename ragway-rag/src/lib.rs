//! # ragway-rag
//!
//! Retrieval-augmented generation over the ragway gateway.
//!
//! ## Overview
//!
//! - [`chunking`] - fixed, sentence and recursive chunkers
//! - [`GatewayEmbedder`] - batched embeddings through the [`Gateway`](ragway_model::Gateway)
//! - [`VectorStore`] - tenant-scoped storage with similarity and hybrid search
//!   ([`InMemoryVectorStore`], and `PgVectorStore` behind the `pgvector` feature)
//! - [`Retriever`] - query embedding plus store lookup
//! - [`LlmQueryRewriter`] and [`HydeGenerator`] - query transformation
//! - [`LlmReranker`] and [`PointwiseReranker`] - model-based reranking
//! - [`Generator`] - grounded answers with `[Source N]` citations
//! - [`RagPipeline`] - ingest, query, search and delete
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragway_model::{GatewayConfig, RequestContext};
//! use ragway_rag::{InMemoryVectorStore, IngestRequest, QueryRequest, RagPipeline};
//!
//! let gateway = Arc::new(GatewayConfig::from_env()?.build_gateway()?);
//! let pipeline = RagPipeline::builder()
//!     .gateway(gateway)
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! let ctx = RequestContext::new(tenant_id);
//! pipeline.ingest(&ctx, IngestRequest::new(document_id, text)).await?;
//! let response = pipeline.query(&ctx, QueryRequest::new("How are chunks stored?")).await?;
//! ```
//!
//! ## Degradation
//!
//! Query rewriting, hypothetical documents and reranking are optional. When
//! one of them fails, the pipeline logs a warning and continues without it.
//! Only retrieval and answer generation failures fail a query.

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod inmemory;
pub mod pipeline;
pub mod query_transform;
pub mod reranker;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "pgvector")]
pub mod pgvector;

pub use chunking::{
    ChunkOptions, ChunkStrategy, Chunker, FixedSizeChunker, RecursiveChunker, SentenceChunker,
    TextChunk, chunk_text, estimate_tokens,
};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Citation, SearchResult};
pub use embedding::{EmbeddingProvider, GatewayEmbedder};
pub use error::{RagError, Result};
pub use generator::{GenerateResponse, Generator};
pub use inmemory::InMemoryVectorStore;
#[cfg(feature = "pgvector")]
pub use pgvector::PgVectorStore;
pub use pipeline::{
    IngestRequest, QueryRequest, QueryResponse, RagPipeline, RagPipelineBuilder, SearchRequest,
};
pub use query_transform::{HydeGenerator, LlmQueryRewriter, QueryRewriter};
pub use reranker::{LlmReranker, NoOpReranker, PointwiseReranker, Reranker};
pub use retriever::{RetrieveOptions, Retriever};
pub use vectorstore::{DeleteFilter, SearchOptions, VectorStore};
