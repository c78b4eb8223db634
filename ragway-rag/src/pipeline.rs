//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the full ingest-and-query workflow by
//! composing an [`EmbeddingProvider`], a [`VectorStore`], a [`Retriever`],
//! optional query transformation, a [`Reranker`] and a [`Generator`].
//!
//! Every operation takes a [`RequestContext`]; its tenant id scopes what is
//! written, searched and deleted.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragway_rag::{IngestRequest, InMemoryVectorStore, QueryRequest, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .gateway(gateway)
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! pipeline.ingest(&ctx, IngestRequest::new(document_id, text)).await?;
//! let answer = pipeline.query(&ctx, QueryRequest::new("What is HyDE?").with_rerank(true)).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use ragway_model::{Gateway, RequestContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::chunking::{ChunkOptions, chunk_text};
use crate::config::RagConfig;
use crate::document::{Chunk, Citation, SearchResult};
use crate::embedding::{EmbeddingProvider, GatewayEmbedder};
use crate::error::{RagError, Result};
use crate::generator::Generator;
use crate::query_transform::{HydeGenerator, LlmQueryRewriter, QueryRewriter};
use crate::reranker::{LlmReranker, Reranker};
use crate::retriever::{RetrieveOptions, Retriever};
use crate::vectorstore::{DeleteFilter, VectorStore};

/// A document to chunk, embed and store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Identifier of the owning document.
    pub document_id: Uuid,
    /// Full document text.
    pub content: String,
    /// Chunking for this document. `None` or a zero size uses the pipeline default.
    #[serde(default)]
    pub chunk_options: Option<ChunkOptions>,
    /// Metadata copied onto every chunk.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl IngestRequest {
    /// Ingest `content` as document `document_id` with default chunking.
    pub fn new(document_id: Uuid, content: impl Into<String>) -> Self {
        Self { document_id, content: content.into(), ..Self::default() }
    }

    /// Use specific chunking options.
    pub fn with_chunk_options(mut self, options: ChunkOptions) -> Self {
        self.chunk_options = Some(options);
        self
    }

    /// Attach metadata to every chunk.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A question to answer from the tenant's documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    /// The user's question.
    pub query: String,
    /// Number of context chunks. Zero or negative uses the configured default.
    pub top_k: i32,
    /// Score floor applied by the store. Zero disables it.
    pub min_score: f32,
    /// Use hybrid vector plus keyword search.
    pub hybrid: bool,
    /// Model for the answer. Empty uses the gateway default.
    pub model: String,
    /// Backend for the answer. `None` uses the gateway default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Rerank retrieved chunks before answering.
    pub rerank: bool,
    /// Retrieve with several rewritten phrasings of the query.
    pub query_rewrite: bool,
    /// Retrieve with a hypothetical answer passage.
    pub use_hyde: bool,
}

impl QueryRequest {
    /// Ask `query` with default settings.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Set the number of context chunks.
    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the score floor.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Toggle hybrid search.
    pub fn with_hybrid(mut self, hybrid: bool) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Set the answer model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Route the answer to a specific backend.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Toggle reranking.
    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    /// Toggle multi-query rewriting.
    pub fn with_query_rewrite(mut self, query_rewrite: bool) -> Self {
        self.query_rewrite = query_rewrite;
        self
    }

    /// Toggle hypothetical-document retrieval.
    pub fn with_hyde(mut self, use_hyde: bool) -> Self {
        self.use_hyde = use_hyde;
        self
    }

    fn plan(&self, default_top_k: usize) -> RetrievalPlan {
        RetrievalPlan {
            options: RetrieveOptions {
                top_k: effective_top_k(self.top_k, default_top_k),
                min_score: self.min_score,
                hybrid: self.hybrid,
            },
            rerank: self.rerank,
            rewrite: self.query_rewrite,
            hyde: self.use_hyde,
        }
    }
}

/// A search over the tenant's documents without answer generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Search text.
    pub query: String,
    /// Number of results. Zero or negative uses the configured default.
    pub top_k: i32,
    /// Score floor applied by the store. Zero disables it.
    pub min_score: f32,
    /// Use hybrid vector plus keyword search.
    pub hybrid: bool,
    /// Rerank the results.
    pub rerank: bool,
    /// Retrieve with several rewritten phrasings of the query.
    pub query_rewrite: bool,
    /// Retrieve with a hypothetical answer passage.
    pub use_hyde: bool,
}

impl SearchRequest {
    /// Search for `query` with default settings.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Set the number of results.
    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the score floor.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Toggle hybrid search.
    pub fn with_hybrid(mut self, hybrid: bool) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Toggle reranking.
    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    /// Toggle multi-query rewriting.
    pub fn with_query_rewrite(mut self, query_rewrite: bool) -> Self {
        self.query_rewrite = query_rewrite;
        self
    }

    /// Toggle hypothetical-document retrieval.
    pub fn with_hyde(mut self, use_hyde: bool) -> Self {
        self.use_hyde = use_hyde;
        self
    }

    fn plan(&self, default_top_k: usize) -> RetrievalPlan {
        RetrievalPlan {
            options: RetrieveOptions {
                top_k: effective_top_k(self.top_k, default_top_k),
                min_score: self.min_score,
                hybrid: self.hybrid,
            },
            rerank: self.rerank,
            rewrite: self.query_rewrite,
            hyde: self.use_hyde,
        }
    }
}

/// A grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Model output.
    pub answer: String,
    /// `citations[i]` is the context entry labelled `[Source i+1]`.
    pub citations: Vec<Citation>,
    /// Model that produced the answer.
    pub model: String,
    /// Total tokens of the answer call.
    pub tokens: u32,
    /// Estimated cost of the answer call in USD.
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Copy)]
struct RetrievalPlan {
    options: RetrieveOptions,
    rerank: bool,
    rewrite: bool,
    hyde: bool,
}

fn effective_top_k(requested: i32, default: usize) -> usize {
    usize::try_from(requested).ok().filter(|k| *k > 0).unwrap_or(default)
}

/// Union of ranked result sets in order, keeping the first occurrence of
/// each chunk, cut to `top_k`.
pub fn merge_unique(result_sets: Vec<Vec<SearchResult>>, top_k: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    result_sets
        .into_iter()
        .flatten()
        .filter(|result| seen.insert(result.chunk_id))
        .take(top_k)
        .collect()
}

/// The RAG pipeline orchestrator.
///
/// Coordinates document ingestion (chunk → embed → store) and query
/// execution (transform → retrieve → rerank → generate). Construct one via
/// [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    gateway: Arc<Gateway>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    retriever: Retriever,
    generator: Generator,
    reranker: Arc<dyn Reranker>,
    query_rewriter: Arc<dyn QueryRewriter>,
    hyde: HydeGenerator,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Ingest a single document: chunk → embed → store.
    ///
    /// Chunks are written under the context's tenant. Returns the chunks
    /// that were stored, with embeddings attached.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NoChunks`] if the content yields no chunks, and
    /// propagates embedding and storage failures. Nothing is stored unless
    /// every chunk was embedded.
    #[instrument(
        name = "rag.ingest",
        skip_all,
        fields(tenant_id = %ctx.tenant_id(), document.id = %request.document_id)
    )]
    pub async fn ingest(&self, ctx: &RequestContext, request: IngestRequest) -> Result<Vec<Chunk>> {
        let tenant_id = ctx.tenant_id();
        let options =
            request.chunk_options.filter(|options| options.size > 0).unwrap_or(self.config.chunking);

        let pieces = chunk_text(&request.content, &options);
        if pieces.is_empty() {
            error!(document.id = %request.document_id, %tenant_id, "no chunks generated from content");
            return Err(RagError::NoChunks);
        }

        let texts: Vec<String> = pieces.iter().map(|piece| piece.content.clone()).collect();
        let embeddings = self.embedding_provider.embed(ctx, &texts).await.map_err(|e| {
            error!(document.id = %request.document_id, error = %e, "embedding failed during ingestion");
            e
        })?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|(piece, embedding)| Chunk {
                id: Uuid::new_v4(),
                document_id: request.document_id,
                tenant_id,
                index: piece.index,
                content: piece.content,
                embedding,
                token_count: piece.token_count,
                metadata: request.metadata.clone(),
            })
            .collect();

        ctx.run(self.vector_store.upsert(&chunks)).await?.map_err(|e| {
            error!(document.id = %request.document_id, error = %e, "upsert failed during ingestion");
            e
        })?;

        info!(
            document.id = %request.document_id,
            %tenant_id,
            chunk_count = chunks.len(),
            strategy = %options.strategy,
            "ingested document"
        );
        Ok(chunks)
    }

    /// Answer a question from the tenant's documents.
    ///
    /// Runs query transformation, retrieval and reranking as requested,
    /// then one generation call. Optional steps degrade silently; only
    /// retrieval and generation failures fail the query.
    #[instrument(name = "rag.query", skip_all, fields(tenant_id = %ctx.tenant_id()))]
    pub async fn query(&self, ctx: &RequestContext, request: QueryRequest) -> Result<QueryResponse> {
        let plan = request.plan(self.config.query_top_k);
        let results = self.retrieve_and_rerank(ctx, &request.query, plan).await?;

        let generated = self
            .generator
            .generate(ctx, &request.query, &results, &request.model, request.backend.as_deref())
            .await
            .map_err(|e| {
                error!(tenant_id = %ctx.tenant_id(), error = %e, "answer generation failed");
                e
            })?;

        info!(
            tenant_id = %ctx.tenant_id(),
            context_count = results.len(),
            model = %generated.model,
            tokens = generated.usage.total_tokens,
            "query completed"
        );

        Ok(QueryResponse {
            answer: generated.answer,
            citations: generated.citations,
            model: generated.model,
            tokens: generated.usage.total_tokens,
            cost_usd: generated.cost_usd,
        })
    }

    /// Return ranked chunks of the tenant's documents without generating an answer.
    #[instrument(name = "rag.search", skip_all, fields(tenant_id = %ctx.tenant_id()))]
    pub async fn search(
        &self,
        ctx: &RequestContext,
        request: SearchRequest,
    ) -> Result<Vec<SearchResult>> {
        let plan = request.plan(self.config.search_top_k);
        let results = self.retrieve_and_rerank(ctx, &request.query, plan).await?;
        info!(tenant_id = %ctx.tenant_id(), result_count = results.len(), "search completed");
        Ok(results)
    }

    /// Remove every chunk of one document. Returns the number removed.
    #[instrument(name = "rag.delete_document", skip_all, fields(tenant_id = %ctx.tenant_id()))]
    pub async fn delete_document(&self, ctx: &RequestContext, document_id: Uuid) -> Result<u64> {
        let filter = DeleteFilter::document(ctx.tenant_id(), document_id);
        let removed = ctx.run(self.vector_store.delete(&filter)).await??;
        info!(document.id = %document_id, tenant_id = %filter.tenant_id, removed, "deleted document chunks");
        Ok(removed)
    }

    /// Remove every chunk of the context's tenant. Returns the number removed.
    #[instrument(name = "rag.delete_tenant", skip_all, fields(tenant_id = %ctx.tenant_id()))]
    pub async fn delete_tenant(&self, ctx: &RequestContext) -> Result<u64> {
        let filter = DeleteFilter::tenant(ctx.tenant_id());
        let removed = ctx.run(self.vector_store.delete(&filter)).await??;
        info!(tenant_id = %filter.tenant_id, removed, "deleted tenant chunks");
        Ok(removed)
    }

    async fn retrieve_and_rerank(
        &self,
        ctx: &RequestContext,
        query: &str,
        plan: RetrievalPlan,
    ) -> Result<Vec<SearchResult>> {
        let results = self.retrieve(ctx, query, &plan).await.map_err(|e| {
            error!(tenant_id = %ctx.tenant_id(), error = %e, "retrieval failed");
            e
        })?;

        if !plan.rerank || results.is_empty() {
            return Ok(results);
        }
        match self.reranker.rerank(ctx, query, results.clone()).await {
            Ok(reranked) => Ok(reranked),
            Err(err) if err.is_interruption() => Err(err),
            Err(err) => {
                warn!(error = %err, "reranking failed, keeping retrieval order");
                Ok(results)
            }
        }
    }

    /// HyDE first, then multi-query rewriting, then plain retrieval. Each
    /// enhancement falls through to the next step when it fails or finds
    /// nothing.
    async fn retrieve(
        &self,
        ctx: &RequestContext,
        query: &str,
        plan: &RetrievalPlan,
    ) -> Result<Vec<SearchResult>> {
        if plan.hyde {
            match self.hyde.generate(ctx, query).await {
                Ok(passage) if !passage.is_empty() => {
                    match self.retriever.retrieve(ctx, &passage, &plan.options).await {
                        Ok(results) if !results.is_empty() => return Ok(results),
                        Ok(_) => debug!("hypothetical document retrieved nothing"),
                        Err(err) if err.is_interruption() => return Err(err),
                        Err(err) => warn!(error = %err, "hypothetical document retrieval failed"),
                    }
                }
                Ok(_) => warn!("empty hypothetical document"),
                Err(err) if err.is_interruption() => return Err(err),
                Err(err) => warn!(error = %err, "hypothetical document generation failed"),
            }
        }

        if plan.rewrite {
            match self.query_rewriter.rewrite(ctx, query).await {
                Ok(variants) if variants.len() > 1 => {
                    return self.multi_query_retrieve(ctx, &variants, &plan.options).await;
                }
                Ok(_) => debug!("query rewrite produced no alternatives"),
                Err(err) if err.is_interruption() => return Err(err),
                Err(err) => warn!(error = %err, "query rewrite failed"),
            }
        }

        self.retriever.retrieve(ctx, query, &plan.options).await
    }

    /// Retrieve for every variant concurrently and merge in variant order.
    /// Failed variants are skipped; if all fail, the first error is returned.
    async fn multi_query_retrieve(
        &self,
        ctx: &RequestContext,
        variants: &[String],
        options: &RetrieveOptions,
    ) -> Result<Vec<SearchResult>> {
        let outcomes =
            join_all(variants.iter().map(|variant| self.retriever.retrieve(ctx, variant, options)))
                .await;

        let mut result_sets = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (variant, outcome) in variants.iter().zip(outcomes) {
            match outcome {
                Ok(results) => result_sets.push(results),
                Err(err) if err.is_interruption() => return Err(err),
                Err(err) => {
                    warn!(variant = %variant, error = %err, "query variant retrieval failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if result_sets.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        let merged = merge_unique(result_sets, options.top_k);
        debug!(variants = variants.len(), result_count = merged.len(), "merged multi-query results");
        Ok(merged)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `gateway` and `vector_store` are required. The embedding provider,
/// reranker and query rewriter default to gateway-backed implementations
/// configured from the [`RagConfig`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .gateway(gateway)
///     .vector_store(Arc::new(store))
///     .reranker(Arc::new(NoOpReranker))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    gateway: Option<Arc<Gateway>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    reranker: Option<Arc<dyn Reranker>>,
    query_rewriter: Option<Arc<dyn QueryRewriter>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the gateway used for embeddings, transformations and answers.
    pub fn gateway(mut self, gateway: Arc<Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Replace the gateway-backed embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Replace the default listwise reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replace the default query rewriter.
    pub fn query_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.query_rewriter = Some(rewriter);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if any required field is missing.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let gateway =
            self.gateway.ok_or_else(|| RagError::Config("gateway is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::Config("vector_store is required".to_string()))?;

        let embedding_provider = self.embedding_provider.unwrap_or_else(|| {
            Arc::new(GatewayEmbedder::from_config(Arc::clone(&gateway), &config))
        });
        let reranker = self.reranker.unwrap_or_else(|| {
            Arc::new(
                LlmReranker::new(Arc::clone(&gateway), &config.assistant_model)
                    .with_preview_chars(config.rerank_preview_chars),
            )
        });
        let query_rewriter = self.query_rewriter.unwrap_or_else(|| {
            Arc::new(LlmQueryRewriter::new(Arc::clone(&gateway), &config.assistant_model))
        });

        Ok(RagPipeline {
            retriever: Retriever::new(Arc::clone(&embedding_provider), Arc::clone(&vector_store)),
            generator: Generator::new(Arc::clone(&gateway))
                .with_citation_preview_chars(config.citation_preview_chars),
            hyde: HydeGenerator::new(Arc::clone(&gateway), &config.assistant_model),
            config,
            gateway,
            embedding_provider,
            vector_store,
            reranker,
            query_rewriter,
        })
    }
}
