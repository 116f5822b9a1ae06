//! Fixed-size row windows, the deterministic baseline strategy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::Dataset;
use crate::types::RagError;

use super::{Chunk, ChunkMetadata, ChunkMethod, Chunker, ChunkingResult};

/// Parameters for [`FixedSizeChunker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedSizeParams {
    /// Rows per window.
    pub chunk_size: usize,
    /// Rows shared between consecutive windows; must stay below
    /// `chunk_size`.
    pub overlap: usize,
}

impl Default for FixedSizeParams {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            overlap: 0,
        }
    }
}

impl FixedSizeParams {
    fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidParameter(
                "chunk_size must be positive".into(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidParameter(
                "overlap must be less than chunk_size".into(),
            ));
        }
        Ok(())
    }
}

/// Slides a window of `chunk_size` rows with step `chunk_size - overlap`.
///
/// The final partial window is emitted, and the walk stops once a window's
/// end reaches the dataset length. Deterministic for a given input; the other
/// strategies are validated against this one in tests.
pub struct FixedSizeChunker {
    params: FixedSizeParams,
}

impl FixedSizeChunker {
    pub fn new(params: FixedSizeParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Chunker for FixedSizeChunker {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::FixedSize
    }

    async fn chunk(&self, dataset: &Dataset) -> Result<ChunkingResult, RagError> {
        dataset.validate()?;
        self.params.validate()?;

        let total_rows = dataset.len();
        let step = (self.params.chunk_size - self.params.overlap).max(1);

        let mut chunks = Vec::new();
        let mut metadata = Vec::new();

        let mut start = 0;
        let mut chunk_index = 0;
        while start < total_rows {
            let end = (start + self.params.chunk_size).min(total_rows);
            let rows = dataset.slice(start, end);

            let mut extra = serde_json::Map::new();
            extra.insert("chunk_size_param".into(), json!(self.params.chunk_size));
            extra.insert("overlap".into(), json!(self.params.overlap));
            extra.insert("actual_size".into(), json!(rows.len()));
            extra.insert("chunking_method".into(), json!("fixed_size"));

            metadata.push(
                ChunkMetadata::new(self.method(), chunk_index, start, end - 1, rows.len())
                    .with_extra(extra),
            );
            chunks.push(Chunk::from_rows(rows));
            chunk_index += 1;

            if end >= total_rows {
                break;
            }
            start += step;
        }

        tracing::debug!(
            chunks = chunks.len(),
            rows = total_rows,
            chunk_size = self.params.chunk_size,
            overlap = self.params.overlap,
            "fixed-size chunking complete"
        );

        Ok(ChunkingResult::assemble(
            self.method(),
            dataset,
            chunks,
            metadata,
        ))
    }
}
