//! In-memory inner-product index with persisted side tables.
//!
//! Vectors are L2-normalized at insert and query time, so the flat
//! inner-product scan approximates cosine similarity. The index itself holds
//! only vectors; ids, metadata, and documents live in side tables keyed by
//! id, with an id↔internal-index bidirectional map tying them together.
//!
//! Persistence is two JSON artifacts per collection directory, `index.json`
//! (the vectors) and `tables.json` (everything else), loaded together or
//! not at all: a partial pair means the store is not ready, never a silently
//! half-loaded index.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::similarity::{dot, normalized};
use crate::types::RagError;

use super::{
    DistanceSpace, MetadataFilter, QueryHit, StoreConfig, VectorRecord, VectorStore,
    matches_filter,
};

const INDEX_FILE: &str = "index.json";
const TABLES_FILE: &str = "tables.json";

#[derive(Default, Debug)]
struct AnnState {
    /// Normalized vectors, aligned with `ids`.
    vectors: Vec<Vec<f32>>,
    /// Internal index → id.
    ids: Vec<String>,
    /// Id → internal index.
    id_to_index: FxHashMap<String, usize>,
    metadata: FxHashMap<String, serde_json::Map<String, serde_json::Value>>,
    documents: FxHashMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct IndexArtifact {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct TablesArtifact {
    dimension: usize,
    ids: Vec<String>,
    metadata: FxHashMap<String, serde_json::Map<String, serde_json::Value>>,
    documents: FxHashMap<String, String>,
    saved_at: DateTime<Utc>,
}

/// Flat inner-product index over normalized vectors.
#[derive(Debug)]
pub struct AnnIndexStore {
    dimension: usize,
    dir: PathBuf,
    state: RwLock<AnnState>,
}

impl AnnIndexStore {
    pub fn new(dimension: usize, dir: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            dir: dir.into(),
            state: RwLock::new(AnnState::default()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.dimension, config.persist_dir.join(&config.collection))
    }

    /// Directory holding the persisted artifacts for this collection.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.state.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the index and side tables.
    pub async fn save(&self) -> Result<(), RagError> {
        let (index, tables) = {
            let state = self.state.read();
            (
                IndexArtifact {
                    dimension: self.dimension,
                    vectors: state.vectors.clone(),
                },
                TablesArtifact {
                    dimension: self.dimension,
                    ids: state.ids.clone(),
                    metadata: state.metadata.clone(),
                    documents: state.documents.clone(),
                    saved_at: Utc::now(),
                },
            )
        };

        fs::create_dir_all(&self.dir).await?;
        let index_json = serde_json::to_vec(&index)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let tables_json = serde_json::to_vec(&tables)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        fs::write(self.dir.join(INDEX_FILE), index_json).await?;
        fs::write(self.dir.join(TABLES_FILE), tables_json).await?;
        Ok(())
    }

    /// Reload persisted state, replacing anything in memory.
    ///
    /// Returns `Ok(false)` when nothing is persisted. A partial artifact
    /// pair or a dimension that does not match this instance fails: the
    /// store is treated as not ready rather than half-loaded.
    pub async fn load(&self) -> Result<bool, RagError> {
        let index_path = self.dir.join(INDEX_FILE);
        let tables_path = self.dir.join(TABLES_FILE);

        match (index_path.exists(), tables_path.exists()) {
            (false, false) => return Ok(false),
            (true, true) => {}
            (index_present, _) => {
                let missing = if index_present { TABLES_FILE } else { INDEX_FILE };
                return Err(RagError::Storage(format!(
                    "partial persisted state in {}: {missing} is missing",
                    self.dir.display()
                )));
            }
        }

        let index: IndexArtifact = serde_json::from_slice(&fs::read(&index_path).await?)
            .map_err(|err| RagError::Storage(format!("corrupt {INDEX_FILE}: {err}")))?;
        let tables: TablesArtifact = serde_json::from_slice(&fs::read(&tables_path).await?)
            .map_err(|err| RagError::Storage(format!("corrupt {TABLES_FILE}: {err}")))?;

        if index.dimension != self.dimension || tables.dimension != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: index.dimension,
            });
        }
        if index.vectors.len() != tables.ids.len() {
            return Err(RagError::Storage(format!(
                "artifact mismatch: {} vectors vs {} ids",
                index.vectors.len(),
                tables.ids.len()
            )));
        }

        let id_to_index = tables
            .ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();

        let mut state = self.state.write();
        *state = AnnState {
            vectors: index.vectors,
            ids: tables.ids,
            id_to_index,
            metadata: tables.metadata,
            documents: tables.documents,
        };
        tracing::debug!(vectors = state.vectors.len(), dir = %self.dir.display(), "ann index loaded");
        Ok(true)
    }

    async fn remove_artifact(&self, name: &str) -> Result<(), RagError> {
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl VectorStore for AnnIndexStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn distance_space(&self) -> DistanceSpace {
        DistanceSpace::NormalizedInnerProduct
    }

    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            if record.embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let mut state = self.state.write();
        for record in records {
            let vector = normalized(&record.embedding);
            match state.id_to_index.get(&record.id).copied() {
                Some(idx) => {
                    // upsert: replace the vector in place
                    state.vectors[idx] = vector;
                }
                None => {
                    let idx = state.vectors.len();
                    state.vectors.push(vector);
                    state.ids.push(record.id.clone());
                    state.id_to_index.insert(record.id.clone(), idx);
                }
            }
            state.metadata.insert(record.id.clone(), record.metadata);
            if let Some(document) = record.document {
                state.documents.insert(record.id, document);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        queries: &[Vec<f32>],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Vec<QueryHit>>, RagError> {
        for query in queries {
            if query.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: query.len(),
                });
            }
        }

        let state = self.state.read();
        if state.vectors.is_empty() {
            return Ok(queries.iter().map(|_| Vec::new()).collect());
        }

        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let query = normalized(query);
            let mut scored: Vec<(usize, f32)> = state
                .vectors
                .iter()
                .enumerate()
                .map(|(idx, vector)| (idx, dot(&query, vector)))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

            // metadata filtering happens after neighbor selection (the index
            // has no native predicate), so fewer than top_k hits may remain
            let mut hits = Vec::new();
            for (idx, score) in scored.into_iter().take(top_k) {
                let id = &state.ids[idx];
                let metadata = state.metadata.get(id).cloned().unwrap_or_default();
                if let Some(filter) = filter {
                    if !matches_filter(&metadata, filter) {
                        continue;
                    }
                }
                hits.push(QueryHit {
                    id: id.clone(),
                    distance: score,
                    metadata,
                    document: state.documents.get(id).cloned(),
                });
            }
            results.push(hits);
        }
        Ok(results)
    }

    async fn reset(&self) -> Result<(), RagError> {
        {
            let mut state = self.state.write();
            *state = AnnState::default();
        }
        self.remove_artifact(INDEX_FILE).await?;
        self.remove_artifact(TABLES_FILE).await?;
        Ok(())
    }
}
