//! End-to-end retrieval tests: chunk a dataset, embed with the mock
//! provider, store on each backend, and search under every similarity
//! metric.

use std::sync::Arc;

use serde_json::json;

use chunksmith::chunking::{ChunkPlan, ChunkingService};
use chunksmith::{
    Dataset, EmbeddingProvider, FixedSizeParams, HybridOptions, HybridWeights,
    MockEmbeddingProvider, RagError, Retriever, Row, SearchOptions, SimilarityMetric,
    StoreBackend, StoreConfig, VectorRecord, chunk_texts, chunks_to_records,
    create_store,
};

const DIMENSION: usize = 32;

fn dataset(n: usize) -> Dataset {
    let rows = (0..n)
        .map(|i| {
            let mut row = Row::default();
            row.insert("product".to_string(), json!(format!("product {i}")));
            row.insert("region".to_string(), json!(format!("region-{}", i % 4)));
            row
        })
        .collect();
    Dataset::new(vec!["product".to_string(), "region".to_string()], rows)
}

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(MockEmbeddingProvider::with_dimension(DIMENSION))
}

/// Chunk, embed, and ingest a dataset into a freshly created backend,
/// returning the retriever plus the texts that were embedded.
async fn populated_retriever(
    backend: StoreBackend,
    dir: &std::path::Path,
    rows: usize,
) -> (Retriever, Vec<String>) {
    let ds = dataset(rows);
    let result = ChunkingService::new()
        .chunk(
            &ds,
            ChunkPlan::FixedSize(FixedSizeParams {
                chunk_size: 2,
                overlap: 0,
            }),
        )
        .await
        .unwrap();

    let embedder = provider();
    let texts = chunk_texts(&ds, &result);
    let embeddings = embedder.embed_batch(&texts).await.unwrap();
    let batch = chunks_to_records(&ds, &result, &embeddings).unwrap();
    assert_eq!(batch.skipped(), 0);

    let config = StoreConfig {
        dimension: DIMENSION,
        persist_dir: dir.to_path_buf(),
        collection: format!("search_{backend}"),
    };
    let store = create_store(backend, &config).await.unwrap();
    store.add(batch.into_records()).await.unwrap();

    (Retriever::new(store, embedder), texts)
}

#[tokio::test]
async fn searching_for_a_stored_text_returns_its_chunk_first() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let (retriever, texts) = populated_retriever(backend, dir.path(), 20).await;

        // the mock provider is deterministic, so the stored text embeds to
        // exactly the vector that was indexed
        let hits = retriever
            .search(&texts[3], &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "fixed_size_chunk_0003", "{backend} missed the exact match");
        assert!(hits[0].similarity_score >= hits.last().unwrap().similarity_score);
    }
}

#[tokio::test]
async fn cosine_scores_stay_in_unit_range_on_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let (retriever, _) = populated_retriever(backend, dir.path(), 40).await;

        let hits = retriever
            .search(
                "region-2 products",
                &SearchOptions {
                    top_k: 10,
                    metric: SimilarityMetric::Cosine,
                    filter: None,
                },
            )
            .await
            .unwrap();
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!(
                (0.0..=1.0).contains(&hit.similarity_score),
                "{backend} cosine score {} out of range",
                hit.similarity_score
            );
        }
    }
}

#[tokio::test]
async fn top_k_bounds_the_result_count() {
    let dir = tempfile::tempdir().unwrap();
    // hundreds of records, top_k=5
    let (retriever, _) = populated_retriever(StoreBackend::Ann, dir.path(), 500).await;

    let hits = retriever
        .search("product 7", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 5);

    for top_k in [0usize, 101] {
        let err = retriever
            .search(
                "anything",
                &SearchOptions {
                    top_k,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidParameter(_)));
    }
}

#[tokio::test]
async fn every_metric_ranks_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let (retriever, _) = populated_retriever(backend, dir.path(), 30).await;
        for metric in SimilarityMetric::ALL {
            let hits = retriever
                .search(
                    "product 4 region-0",
                    &SearchOptions {
                        top_k: 4,
                        metric,
                        filter: None,
                    },
                )
                .await
                .unwrap();
            assert!(!hits.is_empty(), "{backend}/{metric} returned nothing");
            assert!(hits.len() <= 4);
            // dot on the L2 backend passes raw distances through, so its
            // best-first order carries ascending scores
            let ascending =
                backend == StoreBackend::Embedded && metric == SimilarityMetric::Dot;
            for pair in hits.windows(2) {
                let ordered = if ascending {
                    pair[0].similarity_score <= pair[1].similarity_score
                } else {
                    pair[0].similarity_score >= pair[1].similarity_score
                };
                assert!(ordered, "{backend}/{metric} results out of order");
            }
        }
    }
}

#[tokio::test]
async fn euclidean_on_the_ann_backend_overfetches_and_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let (retriever, _) = populated_retriever(StoreBackend::Ann, dir.path(), 60).await;

    let hits = retriever
        .search(
            "product 11",
            &SearchOptions {
                top_k: 7,
                metric: SimilarityMetric::Euclidean,
                filter: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 7);
    for hit in &hits {
        assert!(hit.similarity_score > 0.0, "guarded conversion stays positive");
    }
}

#[tokio::test]
async fn metadata_filter_narrows_search_results() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = provider();
    let config = StoreConfig {
        dimension: DIMENSION,
        persist_dir: dir.path().to_path_buf(),
        collection: "filtered".to_string(),
    };
    let store = create_store(StoreBackend::Embedded, &config).await.unwrap();

    let mut records = Vec::new();
    for i in 0..10 {
        let text = format!("entry {i}");
        let embedding = embedder.embed_batch(&[text.clone()]).await.unwrap().remove(0);
        let mut metadata = serde_json::Map::new();
        metadata.insert("parity".into(), json!(if i % 2 == 0 { "even" } else { "odd" }));
        records.push(
            VectorRecord::new(format!("entry-{i}"), embedding)
                .with_metadata(metadata)
                .with_document(text),
        );
    }
    store.add(records).await.unwrap();

    let retriever = Retriever::new(store, embedder);
    let mut filter = serde_json::Map::new();
    filter.insert("parity".into(), json!("odd"));
    let hits = retriever
        .search(
            "entry 3",
            &SearchOptions {
                top_k: 10,
                metric: SimilarityMetric::Cosine,
                filter: Some(filter),
            },
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 5);
    for hit in &hits {
        assert_eq!(hit.metadata["parity"], json!("odd"));
    }
}

#[tokio::test]
async fn rerank_with_equal_metrics_is_a_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let (retriever, _) = populated_retriever(StoreBackend::Ann, dir.path(), 40).await;

    let plain = retriever
        .search(
            "product 9",
            &SearchOptions {
                top_k: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let reranked = retriever
        .search_with_rerank("product 9", &chunksmith::RerankOptions::default())
        .await
        .unwrap();

    assert_eq!(reranked.len(), 5);
    let ids = |hits: &[chunksmith::SearchHit]| -> Vec<String> {
        hits.iter().map(|h| h.id.clone()).collect()
    };
    assert_eq!(ids(&plain), ids(&reranked));
}

#[tokio::test]
async fn hybrid_search_lets_keywords_outvote_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = provider();
    let config = StoreConfig {
        dimension: DIMENSION,
        persist_dir: dir.path().to_path_buf(),
        collection: "hybrid".to_string(),
    };
    let store = create_store(StoreBackend::Ann, &config).await.unwrap();

    // documents whose text diverges from what was embedded: the keyword
    // signal disagrees with the semantic signal on purpose
    let texts = ["quarterly revenue summary", "unrelated payload", "another payload"];
    let docs = [
        "nothing relevant here",
        "zebra umbrella report",
        "plain filler text",
    ];
    let mut records = Vec::new();
    for (i, (text, doc)) in texts.iter().zip(&docs).enumerate() {
        let embedding = embedder
            .embed_batch(&[text.to_string()])
            .await
            .unwrap()
            .remove(0);
        records.push(VectorRecord::new(format!("doc-{i}"), embedding).with_document(*doc));
    }
    store.add(records).await.unwrap();

    let retriever = Retriever::new(store, embedder);
    let hits = retriever
        .search_hybrid(
            "zebra umbrella report",
            &HybridOptions {
                top_k: 3,
                weights: HybridWeights {
                    keyword: 1.0,
                    semantic: 0.0,
                },
                filter: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(hits[0].id, "doc-1", "full keyword weight must rank the term match first");
    assert!((hits[0].similarity_score - 1.0).abs() < 1e-6);
}
