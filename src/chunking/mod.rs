//! Chunking strategies over tabular datasets.
//!
//! Four strategies partition a [`Dataset`] into retrieval-sized chunks, each
//! scored by the shared quality assessor:
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │   Chunker trait  │
//!                      └────────┬─────────┘
//!                               │
//!        ┌──────────────┬───────┴──────┬────────────────┐
//!        ▼              ▼              ▼                ▼
//!  ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐
//!  │ FixedSize │  │ Recursive │  │ Document   │  │ Semantic  │
//!  │ (rows)    │  │ (chars)   │  │ (key+token)│  │ (cluster) │
//!  └───────────┘  └───────────┘  └────────────┘  └───────────┘
//!                               │
//!                               ▼
//!                   quality::assess → QualityReport
//! ```
//!
//! Strategies are selected through [`ChunkPlan`] (typed parameters) or the
//! stringly [`ChunkPlan::from_value`] boundary, and run through a
//! [`ChunkingService`] which owns the optional embedding provider the
//! semantic strategy needs. Strategies are pure with respect to the dataset:
//! they read it and produce new chunk values.

pub mod cluster;
pub mod document;
pub mod fixed;
pub mod quality;
pub mod recursive;
pub mod semantic;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{Dataset, Row, scalar_text};
use crate::embeddings::EmbeddingProvider;
use crate::types::RagError;

pub use document::DocumentParams;
pub use fixed::FixedSizeParams;
pub use quality::{QualityBand, QualityIssues, QualityReport, SizeStats, assess};
pub use recursive::RecursiveParams;
pub use semantic::SemanticParams;

/// A retrieval-sized unit cut from a dataset.
///
/// Row-oriented strategies carry the member rows; text-collapsing strategies
/// (recursive primary path, semantic) carry synthesized `text`, with the
/// semantic strategy carrying both.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Chunk {
    pub rows: Vec<Row>,
    pub text: Option<String>,
}

impl Chunk {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows, text: None }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            text: Some(text.into()),
        }
    }

    /// Row count for quality accounting. A text-only chunk counts as one
    /// synthetic row, matching how collapsed chunks are sized.
    pub fn row_count(&self) -> usize {
        if self.rows.is_empty() && self.text.is_some() {
            1
        } else {
            self.rows.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.text.is_none()
    }
}

/// Per-chunk bookkeeping, parallel to the chunk sequence.
///
/// `start_idx`/`end_idx` are inclusive indices into the source dataset. For
/// text-collapsed strategies they are approximate bounding markers over the
/// contributing rows, not exact addresses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub start_idx: usize,
    pub end_idx: usize,
    pub chunk_size: usize,
    pub method: String,
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChunkMetadata {
    pub fn new(
        method: ChunkMethod,
        chunk_index: usize,
        start_idx: usize,
        end_idx: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            chunk_id: format!("{method}_chunk_{chunk_index:04}"),
            start_idx,
            end_idx,
            chunk_size,
            method: method.to_string(),
            quality_score: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }
}

/// Why a strategy ran its degraded path instead of its primary one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The recursive character splitter is compiled out.
    SplitterUnavailable,
    /// Token counts were estimated from character length.
    TokenizerUnavailable,
    /// No embedding provider was configured for semantic chunking.
    ClusteringUnavailable,
    /// The embed-and-cluster path failed at runtime.
    ClusteringFailed { detail: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::SplitterUnavailable => f.write_str("recursive splitter unavailable"),
            FallbackReason::TokenizerUnavailable => f.write_str("tokenizer unavailable"),
            FallbackReason::ClusteringUnavailable => {
                f.write_str("no embedding provider configured")
            }
            FallbackReason::ClusteringFailed { detail } => {
                write!(f, "clustering failed: {detail}")
            }
        }
    }
}

/// Output of one chunking run: chunks, parallel metadata, and the quality
/// report over the whole partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub metadata: Vec<ChunkMetadata>,
    pub method: String,
    pub total_chunks: usize,
    pub quality_report: QualityReport,
    /// Set when the strategy ran a degraded path; `None` means the primary
    /// path executed.
    pub fallback: Option<FallbackReason>,
}

impl ChunkingResult {
    /// Assemble a result, assessing quality and stamping the overall score
    /// onto each chunk's metadata.
    pub fn assemble(
        method: ChunkMethod,
        dataset: &Dataset,
        chunks: Vec<Chunk>,
        mut metadata: Vec<ChunkMetadata>,
    ) -> Self {
        debug_assert_eq!(chunks.len(), metadata.len());
        let quality_report = assess(&chunks, dataset.len());
        for meta in &mut metadata {
            meta.quality_score = Some(quality_report.quality_score);
        }
        let total_chunks = chunks.len();
        Self {
            chunks,
            metadata,
            method: method.to_string(),
            total_chunks,
            quality_report,
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, reason: FallbackReason) -> Self {
        self.fallback = Some(reason);
        self
    }
}

/// The closed enumeration of chunking strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMethod {
    FixedSize,
    Recursive,
    DocumentBased,
    Semantic,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::FixedSize => "fixed_size",
            ChunkMethod::Recursive => "recursive",
            ChunkMethod::DocumentBased => "document_based",
            ChunkMethod::Semantic => "semantic",
        }
    }
}

impl fmt::Display for ChunkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkMethod {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_size" | "fixed" => Ok(ChunkMethod::FixedSize),
            "recursive" => Ok(ChunkMethod::Recursive),
            "document_based" | "document" => Ok(ChunkMethod::DocumentBased),
            "semantic" => Ok(ChunkMethod::Semantic),
            other => Err(RagError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A strategy selection with its typed parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ChunkPlan {
    FixedSize(FixedSizeParams),
    Recursive(RecursiveParams),
    DocumentBased(DocumentParams),
    Semantic(SemanticParams),
}

impl ChunkPlan {
    pub fn method(&self) -> ChunkMethod {
        match self {
            ChunkPlan::FixedSize(_) => ChunkMethod::FixedSize,
            ChunkPlan::Recursive(_) => ChunkMethod::Recursive,
            ChunkPlan::DocumentBased(_) => ChunkMethod::DocumentBased,
            ChunkPlan::Semantic(_) => ChunkMethod::Semantic,
        }
    }

    /// Parse a plan from a method name and a JSON parameter object, the form
    /// an HTTP layer hands over.
    ///
    /// Unknown methods fail with [`RagError::UnsupportedMethod`]; malformed
    /// or missing parameters with [`RagError::InvalidParameter`]. A `null`
    /// parameter value means "all defaults".
    pub fn from_value(method: &str, params: Value) -> Result<Self, RagError> {
        let method: ChunkMethod = method.parse()?;
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params
        };
        match method {
            ChunkMethod::FixedSize => parse_params(params).map(ChunkPlan::FixedSize),
            ChunkMethod::Recursive => parse_params(params).map(ChunkPlan::Recursive),
            ChunkMethod::DocumentBased => parse_params(params).map(ChunkPlan::DocumentBased),
            ChunkMethod::Semantic => parse_params(params).map(ChunkPlan::Semantic),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RagError> {
    serde_json::from_value(params)
        .map_err(|err| RagError::InvalidParameter(format!("chunking parameters: {err}")))
}

/// One concrete type per strategy; selected via [`ChunkingService::chunker`].
#[async_trait]
pub trait Chunker: Send + Sync {
    fn method(&self) -> ChunkMethod;

    /// Partition the dataset. The dataset is only read; all strategies
    /// return freshly built chunks.
    async fn chunk(&self, dataset: &Dataset) -> Result<ChunkingResult, RagError>;
}

/// Entry point tying strategies to the optional embedding provider.
///
/// # Examples
///
/// ```rust,ignore
/// use chunksmith::chunking::{ChunkPlan, ChunkingService, FixedSizeParams};
///
/// let service = ChunkingService::builder().build();
/// let result = service
///     .chunk(&dataset, ChunkPlan::FixedSize(FixedSizeParams::default()))
///     .await?;
/// assert_eq!(result.total_chunks, result.chunks.len());
/// ```
#[derive(Clone, Default)]
pub struct ChunkingService {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ChunkingService {
    /// A service with no embedding provider; the semantic strategy will use
    /// its contiguous-block fallback.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ChunkingServiceBuilder {
        ChunkingServiceBuilder::default()
    }

    /// Instantiate the chunker for a plan.
    pub fn chunker(&self, plan: ChunkPlan) -> Box<dyn Chunker> {
        match plan {
            ChunkPlan::FixedSize(params) => Box::new(fixed::FixedSizeChunker::new(params)),
            ChunkPlan::Recursive(params) => Box::new(recursive::RecursiveChunker::new(params)),
            ChunkPlan::DocumentBased(params) => {
                Box::new(document::DocumentBasedChunker::new(params))
            }
            ChunkPlan::Semantic(params) => Box::new(semantic::SemanticChunker::new(
                params,
                self.embedder.clone(),
            )),
        }
    }

    /// Run one chunking pass.
    pub async fn chunk(
        &self,
        dataset: &Dataset,
        plan: ChunkPlan,
    ) -> Result<ChunkingResult, RagError> {
        self.chunker(plan).chunk(dataset).await
    }
}

/// Builder for [`ChunkingService`].
#[derive(Default)]
pub struct ChunkingServiceBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ChunkingServiceBuilder {
    /// Provide the embedding provider the semantic strategy clusters with.
    #[must_use]
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn build(self) -> ChunkingService {
        ChunkingService {
            embedder: self.embedder,
        }
    }
}

/// Render a row as `"col: value"` fragments in column order, omitting absent
/// values. Shared by the text-collapsing strategies.
pub(crate) fn row_pairs(columns: &[String], row: &Row) -> Vec<String> {
    columns
        .iter()
        .filter_map(|col| {
            row.get(col)
                .and_then(scalar_text)
                .map(|value| format!("{col}: {value}"))
        })
        .collect()
}
