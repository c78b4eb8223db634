use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ragway_model::{ChatRequest, Gateway, MockBackend, ModelError, RequestContext};
use ragway_rag::{
    Chunk, ChunkOptions, ChunkStrategy, DeleteFilter, EmbeddingProvider, InMemoryVectorStore,
    IngestRequest, NoOpReranker, QueryRequest, QueryRewriter, RagError, RagPipeline, SearchOptions,
    SearchRequest, SearchResult, VectorStore,
};
use uuid::Uuid;

const DOCUMENT: &str = "Rust guarantees memory safety through ownership and borrowing rules.\n\n\
Tokio is an asynchronous runtime that schedules tasks across worker threads.\n\n\
Vector databases store embeddings and answer nearest neighbour queries quickly.";

/// One chunk per paragraph for the documents below.
fn by_paragraph() -> ChunkOptions {
    ChunkOptions::new(100, 0, ChunkStrategy::Recursive)
}

/// Twelve short paragraphs.
fn long_document() -> String {
    (0..12)
        .map(|i| format!("Paragraph {i} talks about topic{i} and shared words rust tokio."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn system_prompt(request: &ChatRequest) -> &str {
    request.messages.first().map(|m| m.content.as_str()).unwrap_or_default()
}

/// A model that answers each internal prompt kind in a fixed way.
fn scripted_backend(
    rewrite: fn() -> ragway_model::Result<String>,
    hyde: fn() -> ragway_model::Result<String>,
    rerank: fn() -> ragway_model::Result<String>,
) -> MockBackend {
    MockBackend::new("mock").with_chat_handler(move |request| {
        let system = system_prompt(request);
        if system.contains("search query optimizer") {
            rewrite()
        } else if system.contains("factual paragraph") {
            hyde()
        } else if system.contains("relevance scoring") {
            rerank()
        } else {
            Ok("Answer citing [Source 1].".to_string())
        }
    })
}

fn bad_request() -> ragway_model::Result<String> {
    Err(ModelError::Api { backend: "mock".into(), status: 400, message: "bad request".into() })
}

fn pipeline(backend: &MockBackend, store: Arc<InMemoryVectorStore>) -> RagPipeline {
    let gateway = Gateway::builder()
        .backend(Arc::new(backend.clone()))
        .default_model("gpt-4o-mini")
        .max_retries(0)
        .build()
        .unwrap();
    RagPipeline::builder().gateway(Arc::new(gateway)).vector_store(store).build().unwrap()
}

async fn ingested(
    backend: &MockBackend,
    content: &str,
) -> (RagPipeline, Arc<InMemoryVectorStore>, RequestContext) {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(backend, Arc::clone(&store));
    let ctx = RequestContext::new(Uuid::new_v4());
    pipeline
        .ingest(&ctx, IngestRequest::new(Uuid::new_v4(), content).with_chunk_options(by_paragraph()))
        .await
        .unwrap();
    (pipeline, store, ctx)
}

fn chunk_ids(results: &[SearchResult]) -> Vec<Uuid> {
    results.iter().map(|r| r.chunk_id).collect()
}

#[tokio::test]
async fn fixed_chunking_ingest_end_to_end() {
    let backend = MockBackend::new("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(&backend, Arc::clone(&store));
    let ctx = RequestContext::new(Uuid::new_v4());
    let document_id = Uuid::new_v4();

    let chunks = pipeline
        .ingest(
            &ctx,
            IngestRequest::new(document_id, DOCUMENT)
                .with_chunk_options(ChunkOptions::new(50, 0, ChunkStrategy::Fixed)),
        )
        .await
        .unwrap();

    assert_eq!(chunks.len(), DOCUMENT.chars().count().div_ceil(50));
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert_eq!(chunk.tenant_id, ctx.tenant_id());
        assert_eq!(chunk.document_id, document_id);
        assert_eq!(chunk.embedding.len(), ragway_model::mock::MOCK_EMBEDDING_DIM);
    }
    assert_eq!(store.len().await, chunks.len());
    assert_eq!(backend.embed_calls(), 1);
}

#[tokio::test]
async fn zero_chunk_size_uses_default_options() {
    let backend = MockBackend::new("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(&backend, Arc::clone(&store));
    let ctx = RequestContext::new(Uuid::new_v4());

    let chunks = pipeline
        .ingest(
            &ctx,
            IngestRequest::new(Uuid::new_v4(), DOCUMENT)
                .with_chunk_options(ChunkOptions::new(0, 0, ChunkStrategy::Fixed)),
        )
        .await
        .unwrap();

    // the whole document fits one 1000-character recursive chunk
    assert_eq!(chunks.len(), 1);
}

#[tokio::test]
async fn empty_document_fails_without_embedding() {
    let backend = MockBackend::new("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(&backend, Arc::clone(&store));

    let err = pipeline
        .ingest(&RequestContext::new(Uuid::new_v4()), IngestRequest::new(Uuid::new_v4(), " \n\n "))
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::NoChunks));
    assert_eq!(backend.embed_calls(), 0);
}

#[tokio::test]
async fn failed_embedding_stores_nothing() {
    let backend = MockBackend::failing("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(&backend, Arc::clone(&store));

    let err = pipeline
        .ingest(&RequestContext::new(Uuid::new_v4()), IngestRequest::new(Uuid::new_v4(), DOCUMENT))
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::EmbeddingBatch { batch: 0, .. }));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn non_positive_top_k_uses_defaults() {
    let backend = MockBackend::new("mock");
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let search = pipeline.search(&ctx, SearchRequest::new("rust tokio").with_top_k(0)).await.unwrap();
    assert_eq!(search.len(), 10);

    let search = pipeline.search(&ctx, SearchRequest::new("rust tokio").with_top_k(-4)).await.unwrap();
    assert_eq!(search.len(), 10);

    let answer = pipeline.query(&ctx, QueryRequest::new("rust tokio").with_top_k(-1)).await.unwrap();
    assert_eq!(answer.citations.len(), 5);

    let search = pipeline.search(&ctx, SearchRequest::new("rust tokio").with_top_k(3)).await.unwrap();
    assert_eq!(search.len(), 3);
}

#[tokio::test]
async fn query_cites_the_context_it_was_given() {
    let backend = MockBackend::new("mock").with_default_reply("Tokio schedules tasks [Source 1].");
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let context = pipeline.search(&ctx, SearchRequest::new("topic3 tokio").with_top_k(4)).await.unwrap();
    let answer = pipeline.query(&ctx, QueryRequest::new("topic3 tokio").with_top_k(4)).await.unwrap();

    assert_eq!(answer.answer, "Tokio schedules tasks [Source 1].");
    assert_eq!(answer.model, "gpt-4o-mini");
    assert_eq!(answer.tokens, 15);
    assert_eq!(answer.citations.len(), context.len());
    for (citation, source) in answer.citations.iter().zip(&context) {
        assert_eq!(citation.chunk_id, source.chunk_id);
        assert_eq!(citation.document_id, source.document_id);
    }

    let requests = backend.requests();
    let prompt = &requests.last().unwrap().messages[1].content;
    assert!(prompt.contains("[Source 4]"));
    assert!(!prompt.contains("[Source 5]"));
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let backend = MockBackend::new("mock");
    let (pipeline, _store, owner) = ingested(&backend, DOCUMENT).await;
    let stranger = RequestContext::new(Uuid::new_v4());

    assert!(!pipeline.search(&owner, SearchRequest::new("tokio")).await.unwrap().is_empty());
    assert!(pipeline.search(&stranger, SearchRequest::new("tokio")).await.unwrap().is_empty());
    assert!(
        pipeline
            .search(&stranger, SearchRequest::new("tokio").with_hybrid(true))
            .await
            .unwrap()
            .is_empty()
    );

    let answer = pipeline.query(&stranger, QueryRequest::new("tokio")).await.unwrap();
    assert!(answer.citations.is_empty());

    assert_eq!(pipeline.delete_tenant(&stranger).await.unwrap(), 0);
    assert!(pipeline.delete_tenant(&owner).await.unwrap() > 0);
}

#[tokio::test]
async fn failed_hyde_falls_back_to_plain_retrieval() {
    let backend = scripted_backend(|| Ok(String::new()), bad_request, || Ok("[]".into()));
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let plain = pipeline.search(&ctx, SearchRequest::new("topic7")).await.unwrap();
    let with_hyde = pipeline.search(&ctx, SearchRequest::new("topic7").with_hyde(true)).await.unwrap();

    assert_eq!(chunk_ids(&with_hyde), chunk_ids(&plain));
}

#[tokio::test]
async fn hyde_retrieves_with_the_generated_passage() {
    let backend = scripted_backend(
        || Ok(String::new()),
        || Ok("Paragraph 9 talks about topic9.".into()),
        || Ok("[]".into()),
    );
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let results = pipeline.search(&ctx, SearchRequest::new("question").with_hyde(true)).await.unwrap();

    assert!(!results.is_empty());
    let embedded: Vec<String> =
        backend.embedding_requests().into_iter().flat_map(|request| request.input).collect();
    assert!(embedded.contains(&"Paragraph 9 talks about topic9.".to_string()));
    assert!(!embedded.contains(&"question".to_string()));
}

#[tokio::test]
async fn failed_rewrite_falls_back_to_plain_retrieval() {
    let backend = scripted_backend(bad_request, || Ok(String::new()), || Ok("[]".into()));
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let plain = pipeline.search(&ctx, SearchRequest::new("topic2")).await.unwrap();
    let rewritten =
        pipeline.search(&ctx, SearchRequest::new("topic2").with_query_rewrite(true)).await.unwrap();

    assert_eq!(chunk_ids(&rewritten), chunk_ids(&plain));
}

#[tokio::test]
async fn rewritten_queries_are_merged_without_duplicates() {
    let backend = scripted_backend(
        || Ok("topic1 rust\ntopic2 tokio\ntopic3 words".into()),
        || Ok(String::new()),
        || Ok("[]".into()),
    );
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;
    let embeds_before = backend.embed_calls();

    let results = pipeline
        .search(&ctx, SearchRequest::new("topic0").with_query_rewrite(true).with_top_k(6))
        .await
        .unwrap();

    assert_eq!(backend.embed_calls() - embeds_before, 4);
    assert_eq!(results.len(), 6);
    let unique: HashSet<Uuid> = results.iter().map(|r| r.chunk_id).collect();
    assert_eq!(unique.len(), results.len());

    let first_variant = pipeline.search(&ctx, SearchRequest::new("topic0").with_top_k(6)).await.unwrap();
    assert_eq!(chunk_ids(&results), chunk_ids(&first_variant));
}

/// Rewrites every query into the fixed variants `v0`, `v1`, `v2`.
struct FixedVariants;

#[async_trait]
impl QueryRewriter for FixedVariants {
    async fn rewrite(&self, _ctx: &RequestContext, _query: &str) -> ragway_rag::Result<Vec<String>> {
        Ok(vec!["v0".to_string(), "v1".to_string(), "v2".to_string()])
    }
}

/// Embeds `vN` as the one-dimensional vector `[N]`.
struct VariantIndexEmbedder;

#[async_trait]
impl EmbeddingProvider for VariantIndexEmbedder {
    async fn embed(&self, _ctx: &RequestContext, texts: &[String]) -> ragway_rag::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| vec![text.trim_start_matches('v').parse::<f32>().unwrap_or(-1.0)])
            .collect())
    }
}

/// Answers a search with the result set at the index the query vector names.
struct ScriptedStore {
    result_sets: Vec<Vec<SearchResult>>,
}

#[async_trait]
impl VectorStore for ScriptedStore {
    async fn upsert(&self, _chunks: &[Chunk]) -> ragway_rag::Result<()> {
        Ok(())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        _options: &SearchOptions,
    ) -> ragway_rag::Result<Vec<SearchResult>> {
        Ok(self.result_sets.get(embedding[0] as usize).cloned().unwrap_or_default())
    }

    async fn hybrid_search(
        &self,
        _query: &str,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> ragway_rag::Result<Vec<SearchResult>> {
        self.similarity_search(embedding, options).await
    }

    async fn delete(&self, _filter: &DeleteFilter) -> ragway_rag::Result<u64> {
        Ok(0)
    }
}

fn labelled(label: &str, score: f32) -> SearchResult {
    SearchResult {
        chunk_id: Uuid::from_u128(u128::from(label.as_bytes()[0])),
        document_id: Uuid::nil(),
        content: label.to_string(),
        score,
        index: 0,
        metadata: HashMap::new(),
    }
}

#[tokio::test]
async fn variant_results_merge_in_first_seen_order() {
    let [a, b, c, d, e] = ["A", "B", "C", "D", "E"].map(|label| labelled(label, 0.5));
    let store = ScriptedStore {
        result_sets: vec![
            vec![a.clone(), b.clone(), c.clone()],
            vec![b.clone(), c.clone(), d.clone()],
            vec![d.clone(), e.clone()],
        ],
    };
    let backend = MockBackend::new("mock");
    let gateway = Gateway::builder().backend(Arc::new(backend.clone())).build().unwrap();
    let pipeline = RagPipeline::builder()
        .gateway(Arc::new(gateway))
        .vector_store(Arc::new(store))
        .embedding_provider(Arc::new(VariantIndexEmbedder))
        .query_rewriter(Arc::new(FixedVariants))
        .build()
        .unwrap();
    let ctx = RequestContext::new(Uuid::new_v4());

    let results = pipeline
        .search(&ctx, SearchRequest::new("original").with_query_rewrite(true).with_top_k(10))
        .await
        .unwrap();

    let labels: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(labels, ["A", "B", "C", "D", "E"]);
    assert_eq!(backend.chat_calls(), 0);
}

#[tokio::test]
async fn malformed_rerank_keeps_retrieval_order() {
    let backend = scripted_backend(
        || Ok(String::new()),
        || Ok(String::new()),
        || Ok("chunk 3 looks best".into()),
    );
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let plain = pipeline.search(&ctx, SearchRequest::new("topic5")).await.unwrap();
    let reranked = pipeline.search(&ctx, SearchRequest::new("topic5").with_rerank(true)).await.unwrap();

    assert_eq!(reranked, plain);
}

#[tokio::test]
async fn rerank_reorders_search_results() {
    let backend = scripted_backend(
        || Ok(String::new()),
        || Ok(String::new()),
        || Ok(r#"[{"index": 0, "score": 0.1}, {"index": 1, "score": 0.5}, {"index": 2, "score": 0.9}]"#.into()),
    );
    let (pipeline, _store, ctx) = ingested(&backend, &long_document()).await;

    let plain = pipeline.search(&ctx, SearchRequest::new("topic5").with_top_k(3)).await.unwrap();
    let reranked =
        pipeline.search(&ctx, SearchRequest::new("topic5").with_top_k(3).with_rerank(true)).await.unwrap();

    let expected: Vec<Uuid> = plain.iter().rev().map(|r| r.chunk_id).collect();
    assert_eq!(chunk_ids(&reranked), expected);
    assert_eq!(reranked[0].score, 0.9);
}

#[tokio::test]
async fn custom_reranker_replaces_default() {
    let backend = MockBackend::new("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let gateway = Arc::new(Gateway::builder().backend(Arc::new(backend.clone())).build().unwrap());
    let pipeline = RagPipeline::builder()
        .gateway(gateway)
        .vector_store(store)
        .reranker(Arc::new(NoOpReranker))
        .build()
        .unwrap();
    let ctx = RequestContext::new(Uuid::new_v4());
    pipeline.ingest(&ctx, IngestRequest::new(Uuid::new_v4(), DOCUMENT)).await.unwrap();

    pipeline.search(&ctx, SearchRequest::new("rust").with_rerank(true)).await.unwrap();

    assert_eq!(backend.chat_calls(), 0);
}

#[tokio::test]
async fn delete_document_removes_only_that_document() {
    let backend = MockBackend::new("mock");
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline(&backend, Arc::clone(&store));
    let ctx = RequestContext::new(Uuid::new_v4());
    let kept = Uuid::new_v4();
    let removed = Uuid::new_v4();
    for (document_id, content) in [(kept, DOCUMENT.to_string()), (removed, long_document())] {
        let request = IngestRequest::new(document_id, content).with_chunk_options(by_paragraph());
        pipeline.ingest(&ctx, request).await.unwrap();
    }

    assert_eq!(pipeline.delete_document(&ctx, removed).await.unwrap(), 12);

    let results = pipeline.search(&ctx, SearchRequest::new("rust").with_top_k(50)).await.unwrap();
    assert!(results.iter().all(|r| r.document_id == kept));
    assert!(!results.is_empty());
}

#[tokio::test]
async fn cancelled_query_is_not_a_failure() {
    let backend = MockBackend::new("mock");
    let (pipeline, _store, ctx) = ingested(&backend, DOCUMENT).await;
    ctx.cancel();

    let err = pipeline.query(&ctx, QueryRequest::new("rust").with_hyde(true)).await.unwrap_err();

    assert!(err.is_interruption());
}

#[tokio::test]
async fn answer_generation_failure_fails_the_query() {
    let backend = MockBackend::new("mock").with_chat_handler(|_| bad_request());
    let (pipeline, _store, ctx) = ingested(&backend, DOCUMENT).await;

    let err = pipeline.query(&ctx, QueryRequest::new("rust")).await.unwrap_err();

    match err {
        RagError::Model(ModelError::RetriesExhausted { attempts, source, .. }) => {
            assert_eq!(attempts, 1);
            assert!(matches!(*source, ModelError::Api { status: 400, .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}
