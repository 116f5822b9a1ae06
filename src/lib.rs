//! Chunk tabular datasets, store the embedded chunks, retrieve them by
//! similarity.
//!
//! ```text
//! Dataset ──► chunking::ChunkingService ──► ChunkingResult
//!                        │                      │
//!                        │ quality::assess      │ ingest::chunk_texts
//!                        ▼                      ▼
//!                  QualityReport        (external embedding)
//!                                               │
//!                                               ▼
//!                          ingest::chunks_to_records ──► RecordBatch
//!                                               │
//!                                               ▼
//!                    stores::VectorStore (embedded sqlite-vec │ ann index)
//!                                               │
//! query text ──► retrieval::Retriever ──────────┘
//!                │ embed → backend query → metric normalization
//!                ▼
//!            ranked SearchHits
//! ```
//!
//! Four chunking strategies (fixed-size windows, recursive character
//! splitting, key-column document grouping, semantic clustering) share one
//! [`chunking::Chunker`] trait and one quality model. Two vector store
//! backends share the [`stores::VectorStore`] trait, and the retriever
//! normalizes each backend's native distances across three similarity
//! metrics.

pub mod chunking;
pub mod dataset;
pub mod embeddings;
pub mod ingest;
pub mod retrieval;
pub mod similarity;
pub mod stores;
pub mod types;

pub use chunking::{
    Chunk, ChunkMetadata, ChunkMethod, ChunkPlan, Chunker, ChunkingResult, ChunkingService,
    DocumentParams, FallbackReason, FixedSizeParams, QualityBand, QualityReport, RecursiveParams,
    SemanticParams,
};
pub use dataset::{Dataset, Row};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider};
pub use ingest::{RecordBatch, chunk_texts, chunks_to_records};
pub use retrieval::{
    HybridOptions, HybridWeights, RerankOptions, Retriever, SearchHit, SearchOptions,
};
pub use similarity::SimilarityMetric;
pub use stores::{
    AnnIndexStore, DistanceSpace, EmbeddedStore, MetadataFilter, QueryHit, StoreBackend,
    StoreConfig, VectorRecord, VectorStore, create_store,
};
pub use types::RagError;
