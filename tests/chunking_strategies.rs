//! Integration tests for the chunking strategies, driven through the public
//! service and plan boundary.

use std::sync::Arc;

use serde_json::{Value, json};

use chunksmith::chunking::{ChunkPlan, ChunkingService};
use chunksmith::{
    Dataset, DocumentParams, EmbeddingProvider, FallbackReason, FixedSizeParams,
    MockEmbeddingProvider, QualityBand, RagError, Row, SemanticParams,
};

fn dataset(n: usize) -> Dataset {
    let rows = (0..n)
        .map(|i| {
            let mut row = Row::default();
            row.insert("category".to_string(), json!(format!("cat-{}", i % 3)));
            row.insert("title".to_string(), json!(format!("record number {i}")));
            row.insert("score".to_string(), json!(i as f64 / 2.0));
            row
        })
        .collect();
    Dataset::new(
        vec![
            "category".to_string(),
            "title".to_string(),
            "score".to_string(),
        ],
        rows,
    )
}

fn service() -> ChunkingService {
    ChunkingService::new()
}

#[tokio::test]
async fn fixed_size_without_overlap_reconstructs_the_dataset() {
    let ds = dataset(23);
    let result = service()
        .chunk(
            &ds,
            ChunkPlan::FixedSize(FixedSizeParams {
                chunk_size: 5,
                overlap: 0,
            }),
        )
        .await
        .unwrap();

    let rebuilt: Vec<&Row> = result.chunks.iter().flat_map(|c| c.rows.iter()).collect();
    assert_eq!(rebuilt.len(), 23);
    for (original, rebuilt) in ds.rows().iter().zip(rebuilt) {
        assert_eq!(original, rebuilt);
    }
    assert!((result.quality_report.coverage - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn fixed_size_overlap_is_shared_between_consecutive_chunks() {
    let ds = dataset(30);
    let result = service()
        .chunk(
            &ds,
            ChunkPlan::FixedSize(FixedSizeParams {
                chunk_size: 7,
                overlap: 3,
            }),
        )
        .await
        .unwrap();

    for pair in result.chunks.windows(2) {
        let shared = pair[0]
            .rows
            .iter()
            .filter(|row| pair[1].rows.contains(row))
            .count();
        assert_eq!(shared, 3);
    }
}

#[tokio::test]
async fn fixed_size_rejects_contradictory_parameters() {
    let ds = dataset(10);
    for (chunk_size, overlap) in [(0usize, 0usize), (4, 4), (4, 7)] {
        let err = service()
            .chunk(
                &ds,
                ChunkPlan::FixedSize(FixedSizeParams {
                    chunk_size,
                    overlap,
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidParameter(_)));
    }
}

#[tokio::test]
async fn unknown_method_is_unsupported() {
    let err = ChunkPlan::from_value("zigzag", Value::Null).unwrap_err();
    assert!(matches!(err, RagError::UnsupportedMethod(_)));
}

#[tokio::test]
async fn plan_boundary_round_trips_parameters() {
    let plan = ChunkPlan::from_value(
        "fixed_size",
        json!({"chunk_size": 4, "overlap": 1}),
    )
    .unwrap();
    let result = service().chunk(&dataset(10), plan).await.unwrap();
    assert_eq!(result.metadata[0].extra["chunk_size_param"], json!(4));
    assert_eq!(result.metadata[0].extra["overlap"], json!(1));
}

#[cfg(feature = "recursive-splitter")]
#[tokio::test]
async fn recursive_chunks_are_character_budgeted_text() {
    let ds = dataset(40);
    let plan = ChunkPlan::from_value(
        "recursive",
        json!({"chunk_size": 200, "overlap": 30}),
    )
    .unwrap();
    let result = service().chunk(&ds, plan).await.unwrap();

    assert!(result.total_chunks > 1);
    assert!(result.fallback.is_none());
    for chunk in &result.chunks {
        let text = chunk.text.as_deref().expect("recursive chunks carry text");
        assert!(text.len() <= 200);
    }
}

#[tokio::test]
async fn document_based_partitions_by_key_column() {
    // 10 rows, 3 distinct key values, generous token budget
    let ds = dataset(10);
    let result = service()
        .chunk(
            &ds,
            ChunkPlan::DocumentBased(DocumentParams::new("category")),
        )
        .await
        .unwrap();

    assert_eq!(result.total_chunks, 3);
    let total_rows: usize = result.chunks.iter().map(|c| c.rows.len()).sum();
    assert_eq!(total_rows, 10);

    // every chunk is key-homogeneous
    for chunk in &result.chunks {
        let mut keys: Vec<&str> = chunk
            .rows
            .iter()
            .map(|row| row["category"].as_str().unwrap())
            .collect();
        keys.dedup();
        assert_eq!(keys.len(), 1);
    }
}

#[tokio::test]
async fn document_based_requires_the_key_column() {
    let err = service()
        .chunk(
            &dataset(10),
            ChunkPlan::DocumentBased(DocumentParams::new("missing_column")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidParameter(_)));
}

#[tokio::test]
async fn document_based_subsplits_oversized_groups() {
    let mut params = DocumentParams::new("category");
    params.token_limit = 8;
    let result = service()
        .chunk(&dataset(30), ChunkPlan::DocumentBased(params))
        .await
        .unwrap();

    let subchunks: Vec<_> = result
        .metadata
        .iter()
        .filter(|m| m.extra["is_subchunk"] == json!(true))
        .collect();
    assert!(!subchunks.is_empty(), "a tiny budget must force sub-splitting");
    for meta in &subchunks {
        let index = meta.extra["subchunk_index"].as_u64().unwrap();
        let total = meta.extra["total_subchunks"].as_u64().unwrap();
        assert!(index >= 1 && index <= total);
    }
    let total_rows: usize = result.chunks.iter().map(|c| c.rows.len()).sum();
    assert_eq!(total_rows, 30, "sub-splitting must not lose rows");
}

#[tokio::test]
async fn semantic_fallback_partitions_into_equal_blocks() {
    let result = service()
        .chunk(
            &dataset(9),
            ChunkPlan::Semantic(SemanticParams {
                n_clusters: 3,
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    assert_eq!(result.total_chunks, 3);
    assert!(result.chunks.iter().all(|c| c.rows.len() == 3));
    assert_eq!(result.fallback, Some(FallbackReason::ClusteringUnavailable));
    for meta in &result.metadata {
        assert_eq!(meta.extra["chunking_method"], json!("semantic_fallback"));
    }
}

#[tokio::test]
async fn semantic_clustering_runs_with_a_provider() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::with_dimension(32));
    let service = ChunkingService::builder()
        .with_embedding_provider(embedder)
        .build();

    let result = service
        .chunk(
            &dataset(15),
            ChunkPlan::Semantic(SemanticParams {
                n_clusters: 4,
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    assert!(result.fallback.is_none());
    assert!(result.total_chunks <= 4);
    let total_rows: usize = result.chunks.iter().map(|c| c.rows.len()).sum();
    assert_eq!(total_rows, 15, "clusters must partition the rows");
    for meta in &result.metadata {
        assert_eq!(meta.extra["chunking_method"], json!("semantic_clustering"));
        assert!(meta.extra["cluster_id"].is_u64());
    }
}

#[tokio::test]
async fn quality_report_on_perfect_partition_is_excellent() {
    let result = service()
        .chunk(
            &dataset(50),
            ChunkPlan::FixedSize(FixedSizeParams {
                chunk_size: 10,
                overlap: 0,
            }),
        )
        .await
        .unwrap();

    let report = &result.quality_report;
    assert!(report.quality_score >= 0.9);
    assert_eq!(report.overall_quality, QualityBand::Excellent);
    assert_eq!(report.issues.empty_chunks, 0);
    assert_eq!(report.issues.very_small_chunks, 0);
    assert_eq!(report.issues.very_large_chunks, 0);
    // the overall score is stamped onto every chunk's metadata
    for meta in &result.metadata {
        assert_eq!(meta.quality_score, Some(report.quality_score));
    }
}

#[tokio::test]
async fn empty_dataset_is_rejected_not_scored() {
    let empty = Dataset::new(vec!["a".to_string()], vec![]);
    let err = service()
        .chunk(&empty, ChunkPlan::FixedSize(FixedSizeParams::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidParameter(_)));
}
