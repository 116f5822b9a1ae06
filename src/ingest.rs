//! Turning chunking output into vector-store records.
//!
//! The pipeline between chunking and storage is thin: render each chunk to
//! text, embed the texts (outside this crate's concern), then pair chunks
//! with their vectors into storable [`VectorRecord`]s. Chunks whose
//! embedding is missing are skipped and counted rather than failing the
//! whole batch.

use serde_json::json;

use crate::chunking::{Chunk, ChunkingResult, row_pairs};
use crate::dataset::Dataset;
use crate::stores::{VectorRecord, sanitize_metadata};
use crate::types::RagError;

/// Records ready for [`crate::stores::VectorStore::add`], with an account of
/// chunks that were skipped for lack of an embedding.
#[derive(Clone, Debug)]
pub struct RecordBatch {
    records: Vec<VectorRecord>,
    skipped: usize,
}

impl RecordBatch {
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<VectorRecord> {
        self.records
    }

    /// Number of records that will be stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Chunks dropped because they had no embedding.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Render one chunk for embedding: synthesized text when the strategy
/// produced it, otherwise `"col: value | col: value"` lines per row.
pub fn render_chunk_text(chunk: &Chunk, columns: &[String]) -> String {
    if let Some(text) = &chunk.text {
        return text.clone();
    }
    chunk
        .rows
        .iter()
        .map(|row| row_pairs(columns, row).join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rendered text for every chunk of a result, in order. Feed this to an
/// embedding provider and hand both back to [`chunks_to_records`].
pub fn chunk_texts(dataset: &Dataset, result: &ChunkingResult) -> Vec<String> {
    result
        .chunks
        .iter()
        .map(|chunk| render_chunk_text(chunk, dataset.columns()))
        .collect()
}

/// Pair each chunk with its embedding into storable records.
///
/// `embeddings` must be parallel to `result.chunks`; an empty vector marks a
/// chunk whose embedding failed, which is skipped and counted. Record ids
/// are the chunk ids, so re-ingesting a result upserts rather than
/// duplicates.
pub fn chunks_to_records(
    dataset: &Dataset,
    result: &ChunkingResult,
    embeddings: &[Vec<f32>],
) -> Result<RecordBatch, RagError> {
    if embeddings.len() != result.chunks.len() {
        return Err(RagError::InvalidParameter(format!(
            "{} embeddings for {} chunks",
            embeddings.len(),
            result.chunks.len()
        )));
    }

    let mut records = Vec::with_capacity(result.chunks.len());
    let mut skipped = 0usize;

    for ((chunk, meta), embedding) in result
        .chunks
        .iter()
        .zip(&result.metadata)
        .zip(embeddings)
    {
        if embedding.is_empty() {
            skipped += 1;
            continue;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("chunk_id".into(), json!(meta.chunk_id));
        metadata.insert("method".into(), json!(meta.method));
        metadata.insert("start_idx".into(), json!(meta.start_idx));
        metadata.insert("end_idx".into(), json!(meta.end_idx));
        metadata.insert("chunk_size".into(), json!(meta.chunk_size));
        if let Some(score) = meta.quality_score {
            metadata.insert("quality_score".into(), json!(score));
        }
        for (key, value) in &meta.extra {
            metadata.insert(key.clone(), value.clone());
        }

        let record = VectorRecord::new(meta.chunk_id.clone(), embedding.clone())
            .with_metadata(sanitize_metadata(&metadata, &meta.chunk_id))
            .with_document(render_chunk_text(chunk, dataset.columns()));
        records.push(record);
    }

    if skipped > 0 {
        tracing::warn!(skipped, "chunks without embeddings were not converted");
    }
    Ok(RecordBatch { records, skipped })
}
