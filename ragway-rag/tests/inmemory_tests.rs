//! Property tests for in-memory vector store search ordering and tenant scoping.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use ragway_rag::document::Chunk;
use ragway_rag::inmemory::InMemoryVectorStore;
use ragway_rag::vectorstore::{SearchOptions, VectorStore};
use uuid::Uuid;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate a chunk owned by one of two tenants.
fn arb_chunk(dim: usize, tenants: [Uuid; 2]) -> impl Strategy<Value = Chunk> {
    (any::<u128>(), any::<bool>(), "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        move |(id, second_tenant, content, embedding)| Chunk {
            id: Uuid::from_u128(id),
            document_id: Uuid::from_u128(7),
            tenant_id: if second_tenant { tenants[1] } else { tenants[0] },
            index: 0,
            content,
            embedding,
            token_count: 1,
            metadata: HashMap::new(),
        },
    )
}

fn dedup(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks.into_iter().filter(|chunk| seen.insert(chunk.id)).collect()
}

const TENANTS: [Uuid; 2] = [Uuid::from_u128(1), Uuid::from_u128(2)];

/// **Property: search ordering**
/// *For any* set of chunks stored in an InMemoryVectorStore, similarity and
/// hybrid search return results ordered by descending score, at most `top_k`
/// of them.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            chunks in proptest::collection::vec(arb_chunk(DIM, TENANTS), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
            hybrid in any::<bool>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, tenant_count) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                let unique_chunks = dedup(chunks);
                let tenant_count =
                    unique_chunks.iter().filter(|c| c.tenant_id == TENANTS[0]).count();

                store.upsert(&unique_chunks).await.unwrap();
                let options = SearchOptions::new(TENANTS[0], top_k);
                let results = if hybrid {
                    store.hybrid_search("abc def", &query, &options).await.unwrap()
                } else {
                    store.similarity_search(&query, &options).await.unwrap()
                };
                (results, tenant_count)
            });

            // Result count is at most top_k and at most the tenant's chunk count
            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(tenant_count));

            // Results are ordered by descending score
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

/// **Property: tenant isolation**
/// *For any* mix of chunks from two tenants, a search scoped to one tenant
/// never returns a chunk stored by the other.
mod prop_inmemory_tenant_isolation {
    use super::*;

    const DIM: usize = 8;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn search_never_crosses_tenants(
            chunks in proptest::collection::vec(arb_chunk(DIM, TENANTS), 1..30),
            query in arb_normalized_embedding(DIM),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let unique_chunks = dedup(chunks);
            let foreign: HashSet<Uuid> = unique_chunks
                .iter()
                .filter(|c| c.tenant_id == TENANTS[1])
                .map(|c| c.id)
                .collect();

            let results = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.upsert(&unique_chunks).await.unwrap();
                let options = SearchOptions::new(TENANTS[0], 100);
                let mut all = store.similarity_search(&query, &options).await.unwrap();
                all.extend(store.hybrid_search("abc", &query, &options).await.unwrap());
                all
            });

            for result in &results {
                prop_assert!(!foreign.contains(&result.chunk_id));
            }
        }
    }
}

#[tokio::test]
async fn min_score_floor_is_applied_only_when_positive() {
    let store = InMemoryVectorStore::new();
    let tenant = Uuid::new_v4();
    let chunk = |content: &str, embedding: Vec<f32>| Chunk {
        id: Uuid::new_v4(),
        document_id: Uuid::new_v4(),
        tenant_id: tenant,
        index: 0,
        content: content.to_string(),
        embedding,
        token_count: 1,
        metadata: HashMap::new(),
    };
    store
        .upsert(&[chunk("same", vec![1.0, 0.0]), chunk("opposite", vec![-1.0, 0.0])])
        .await
        .unwrap();

    let all = store.similarity_search(&[1.0, 0.0], &SearchOptions::new(tenant, 10)).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].content, "opposite");

    let floored = store
        .similarity_search(&[1.0, 0.0], &SearchOptions::new(tenant, 10).with_min_score(0.5))
        .await
        .unwrap();
    assert_eq!(floored.len(), 1);
    assert_eq!(floored[0].content, "same");
}
