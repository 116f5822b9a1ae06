//! Vector storage backends.
//!
//! A unified [`VectorStore`] trait abstracts over two structurally different
//! backends so retrieval code never ties itself to one index:
//!
//! ```text
//!                  ┌───────────────────┐
//!                  │ VectorStore trait │
//!                  │ add / query/reset │
//!                  └─────────┬─────────┘
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!      ┌───────────────┐          ┌─────────────────┐
//!      │ EmbeddedStore │          │  AnnIndexStore  │
//!      │ sqlite-vec,   │          │  in-memory IP,  │
//!      │ native L2 +   │          │  normalized     │
//!      │ json filters  │          │  vectors + side │
//!      └───────────────┘          │  tables         │
//!                                 └─────────────────┘
//! ```
//!
//! Each backend reports its [`DistanceSpace`] so the retriever can normalize
//! native distances into the similarity scale a caller asked for. The vector
//! dimension is fixed per store instance; an `add` with a different length
//! fails with [`RagError::DimensionMismatch`]. Querying an empty store
//! returns empty result sets rather than an error, keeping retrieval
//! idempotent regardless of pipeline stage.
//!
//! Store instances own mutable state that is not designed for concurrent
//! writers: serialize `add`/`reset`/`save`/`load` per collection. Concurrent
//! queries while no write is in flight are safe.

pub mod ann;
pub mod embedded;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RagError;

pub use ann::AnnIndexStore;
pub use embedded::EmbeddedStore;

/// Equality conditions over record metadata.
pub type MetadataFilter = serde_json::Map<String, Value>;

/// What a backend's native query distance means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceSpace {
    /// Smaller is closer (L2 distance).
    L2,
    /// Larger is closer; vectors were L2-normalized, so the inner product
    /// approximates cosine similarity.
    NormalizedInnerProduct,
}

/// An embedded chunk ready for storage.
///
/// Records are value objects owned by whichever store instance holds them;
/// re-adding an existing id goes through upsert semantics rather than
/// mutation in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique within a collection.
    pub id: String,
    pub embedding: Vec<f32>,
    /// Scalar values only; use [`sanitize_metadata`] before constructing
    /// records from open maps.
    pub metadata: serde_json::Map<String, Value>,
    pub document: Option<String>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: serde_json::Map::new(),
            document: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }
}

/// One ranked result from [`VectorStore::query`]; `distance` is in the
/// backend's native space.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub distance: f32,
    pub metadata: serde_json::Map<String, Value>,
    pub document: Option<String>,
}

/// Common contract over the storage backends.
#[async_trait]
pub trait VectorStore: Send + Sync + fmt::Debug {
    /// The fixed vector dimension of this instance.
    fn dimension(&self) -> usize;

    /// Meaning of the distances this backend returns.
    fn distance_space(&self) -> DistanceSpace;

    /// Store records. Duplicate ids upsert; a wrong-length embedding aborts
    /// the call with [`RagError::DimensionMismatch`].
    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), RagError>;

    /// Nearest records per query vector, best first, at most `top_k` each.
    async fn query(
        &self,
        queries: &[Vec<f32>],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Vec<QueryHit>>, RagError>;

    /// Drop all stored records and any persisted artifacts.
    async fn reset(&self) -> Result<(), RagError>;
}

/// The closed enumeration of backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Persistent, metadata-filterable store queried by native L2 distance.
    Embedded,
    /// In-memory approximate-nearest-neighbor index with side tables.
    Ann,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Embedded => "embedded",
            StoreBackend::Ann => "ann",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded" => Ok(StoreBackend::Embedded),
            "ann" => Ok(StoreBackend::Ann),
            other => Err(RagError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Immutable store construction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dimension: usize,
    /// Root directory for persisted state; each collection gets its own
    /// database file (embedded) or artifact directory (ann) underneath.
    pub persist_dir: PathBuf,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            persist_dir: PathBuf::from(".chunksmith"),
            collection: "chunks".to_string(),
        }
    }
}

/// Construct a backend from configuration.
///
/// The ANN backend reloads any previously persisted artifacts; a partial
/// artifact pair surfaces as a [`RagError::Storage`] (store-not-ready) here
/// rather than producing a half-loaded index later.
pub async fn create_store(
    backend: StoreBackend,
    config: &StoreConfig,
) -> Result<Arc<dyn VectorStore>, RagError> {
    match backend {
        StoreBackend::Embedded => {
            let store = EmbeddedStore::open(config).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Ann => {
            let store = AnnIndexStore::from_config(config);
            store.load().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Reduce an open metadata map to storage-safe scalars.
///
/// Nulls are dropped, non-scalars are coerced to their JSON text, and an
/// empty result falls back to `{"chunk_id": <id>}` so every record carries
/// at least one filterable key.
pub fn sanitize_metadata(
    metadata: &serde_json::Map<String, Value>,
    fallback_id: &str,
) -> serde_json::Map<String, Value> {
    let mut safe = serde_json::Map::new();
    for (key, value) in metadata {
        match value {
            Value::Null => {}
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                safe.insert(key.clone(), value.clone());
            }
            other => {
                safe.insert(key.clone(), Value::String(other.to_string()));
            }
        }
    }
    if safe.is_empty() {
        safe.insert("chunk_id".to_string(), Value::String(fallback_id.to_string()));
    }
    safe
}

/// `true` when `metadata` satisfies every equality condition in `filter`.
pub(crate) fn matches_filter(
    metadata: &serde_json::Map<String, Value>,
    filter: &MetadataFilter,
) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}
