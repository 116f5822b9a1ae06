//! Integration tests for the vector store backends through the factory
//! boundary, including the ANN backend's persistence round-trip.

use serde_json::json;

use chunksmith::{
    AnnIndexStore, MetadataFilter, RagError, StoreBackend, StoreConfig, VectorRecord, VectorStore,
    create_store,
};

fn config(dir: &std::path::Path, dimension: usize) -> StoreConfig {
    StoreConfig {
        dimension,
        persist_dir: dir.to_path_buf(),
        collection: "chunks".to_string(),
    }
}

fn records(dimension: usize, count: usize) -> Vec<VectorRecord> {
    (0..count)
        .map(|i| {
            let mut embedding = vec![0.0; dimension];
            embedding[i % dimension] = 1.0;
            embedding[(i + 1) % dimension] = (i as f32) / (count as f32);

            let mut metadata = serde_json::Map::new();
            metadata.insert("bucket".into(), json!(i % 2));
            VectorRecord::new(format!("rec-{i:03}"), embedding)
                .with_metadata(metadata)
                .with_document(format!("payload {i}"))
        })
        .collect()
}

#[tokio::test]
async fn backend_names_resolve_through_the_factory() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 4);

    let embedded = create_store("embedded".parse().unwrap(), &cfg).await.unwrap();
    assert_eq!(embedded.dimension(), 4);

    let ann = create_store("ann".parse().unwrap(), &cfg).await.unwrap();
    assert_eq!(ann.dimension(), 4);

    assert!(matches!(
        "chroma".parse::<StoreBackend>(),
        Err(RagError::UnsupportedBackend(_))
    ));
}

#[tokio::test]
async fn ann_round_trip_returns_the_original_id_first() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 8);
    let rows = records(8, 20);
    let probe = rows[7].embedding.clone();

    let store = AnnIndexStore::from_config(&cfg);
    store.add(rows).await.unwrap();
    store.save().await.unwrap();

    // fresh instance over the same collection directory
    let reloaded = create_store(StoreBackend::Ann, &cfg).await.unwrap();
    let results = reloaded.query(&[probe], 1, None).await.unwrap();
    assert_eq!(results[0][0].id, "rec-007");
    assert_eq!(results[0][0].document.as_deref(), Some("payload 7"));
}

#[tokio::test]
async fn ann_partial_artifacts_fail_factory_construction() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 8);

    let store = AnnIndexStore::from_config(&cfg);
    store.add(records(8, 3)).await.unwrap();
    store.save().await.unwrap();

    // delete one of the two artifacts
    std::fs::remove_file(dir.path().join("chunks").join("tables.json")).unwrap();

    let err = create_store(StoreBackend::Ann, &cfg).await.unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));
}

#[tokio::test]
async fn ann_reset_deletes_persisted_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 8);

    let store = AnnIndexStore::from_config(&cfg);
    store.add(records(8, 5)).await.unwrap();
    store.save().await.unwrap();
    store.reset().await.unwrap();

    assert!(!dir.path().join("chunks").join("index.json").exists());
    assert!(!dir.path().join("chunks").join("tables.json").exists());

    // and a fresh factory construction sees an empty, ready store
    let fresh = create_store(StoreBackend::Ann, &cfg).await.unwrap();
    let results = fresh.query(&[vec![1.0; 8]], 5, None).await.unwrap();
    assert!(results[0].is_empty());
}

#[tokio::test]
async fn querying_an_empty_ann_index_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = create_store(StoreBackend::Ann, &config(dir.path(), 4))
        .await
        .unwrap();
    let results = store
        .query(&[vec![0.5, 0.5, 0.0, 0.0]], 10, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_empty());
}

#[tokio::test]
async fn dimension_mismatch_is_fatal_on_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let store = create_store(backend, &config(dir.path(), 6)).await.unwrap();
        let err = store
            .add(vec![VectorRecord::new("bad", vec![1.0, 2.0])])
            .await
            .unwrap_err();
        assert!(
            matches!(err, RagError::DimensionMismatch { expected: 6, actual: 2 }),
            "{backend} must reject wrong-length vectors"
        );
    }
}

#[tokio::test]
async fn metadata_filters_work_on_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let store = create_store(backend, &config(dir.path(), 8)).await.unwrap();
        store.add(records(8, 10)).await.unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("bucket".into(), json!(1));
        let results = store
            .query(&[records(8, 10)[1].embedding.clone()], 10, Some(&filter))
            .await
            .unwrap();

        assert!(!results[0].is_empty(), "{backend} returned nothing");
        for hit in &results[0] {
            assert_eq!(hit.metadata["bucket"], json!(1), "{backend} leaked a record");
        }
    }
}

#[tokio::test]
async fn duplicate_ids_upsert_on_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Embedded, StoreBackend::Ann] {
        let store = create_store(backend, &config(dir.path(), 4)).await.unwrap();

        let first = VectorRecord::new("dup", vec![1.0, 0.0, 0.0, 0.0])
            .with_document("first version");
        let second = VectorRecord::new("dup", vec![0.0, 1.0, 0.0, 0.0])
            .with_document("second version");
        store.add(vec![first]).await.unwrap();
        store.add(vec![second]).await.unwrap();

        let results = store
            .query(&[vec![0.0, 1.0, 0.0, 0.0]], 5, None)
            .await
            .unwrap();
        let dup_hits: Vec<_> = results[0].iter().filter(|h| h.id == "dup").collect();
        assert_eq!(dup_hits.len(), 1, "{backend} kept a stale duplicate");
        assert_eq!(dup_hits[0].document.as_deref(), Some("second version"));
    }
}
