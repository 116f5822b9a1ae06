//! Semantic chunking: embed each row, cluster the embeddings, and emit one
//! chunk per cluster.
//!
//! The primary path needs an embedding provider; any failure there (or the
//! absence of a provider) degrades to a contiguous-block fallback instead of
//! propagating, and the result records which path ran, both via
//! [`ChunkingResult::fallback`] and the `chunking_method` metadata suffix
//! (`semantic_clustering` vs `semantic_fallback`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::Dataset;
use crate::embeddings::EmbeddingProvider;
use crate::types::RagError;

use super::cluster::kmeans;
use super::{
    Chunk, ChunkMetadata, ChunkMethod, Chunker, ChunkingResult, FallbackReason, row_pairs,
};

/// Fixed clustering seed; semantic chunking must be reproducible.
const CLUSTER_SEED: u64 = 42;

/// Parameters for [`SemanticChunker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticParams {
    /// Requested cluster count; clamped to the row count.
    pub n_clusters: usize,
    /// Advisory embedding model name recorded in chunk metadata; the actual
    /// model is whatever provider the service was built with.
    pub model_name: String,
}

impl Default for SemanticParams {
    fn default() -> Self {
        Self {
            n_clusters: 5,
            model_name: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Clusters rows by embedding similarity, with a deterministic
/// contiguous-block fallback when embedding or clustering is unavailable.
pub struct SemanticChunker {
    params: SemanticParams,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SemanticChunker {
    pub fn new(params: SemanticParams, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { params, embedder }
    }

    /// Render each row as a space-joined `"col: value"` sentence.
    fn sentences(dataset: &Dataset) -> Vec<String> {
        dataset
            .rows()
            .iter()
            .map(|row| row_pairs(dataset.columns(), row).join(" "))
            .collect()
    }

    async fn cluster_chunks(
        &self,
        dataset: &Dataset,
        embedder: &Arc<dyn EmbeddingProvider>,
    ) -> Result<ChunkingResult, RagError> {
        let sentences = Self::sentences(dataset);
        let embeddings = embedder.embed_batch(&sentences).await?;
        if embeddings.len() != sentences.len() {
            return Err(RagError::ModelUnavailable(format!(
                "provider returned {} embeddings for {} rows",
                embeddings.len(),
                sentences.len()
            )));
        }

        let k = self.params.n_clusters.min(dataset.len());
        let labels = kmeans(&embeddings, k, CLUSTER_SEED)?;

        // member row indices per raw label
        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (row_idx, &label) in labels.iter().enumerate() {
            clusters[label].push(row_idx);
        }

        let mut chunks = Vec::new();
        let mut metadata = Vec::new();
        let mut chunk_index = 0;

        for (cluster_id, members) in clusters.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let rows: Vec<_> = members
                .iter()
                .filter_map(|&i| dataset.row(i).cloned())
                .collect();
            let text = members
                .iter()
                .map(|&i| sentences[i].as_str())
                .collect::<Vec<_>>()
                .join(" ");

            let mut extra = serde_json::Map::new();
            extra.insert("cluster_id".into(), json!(cluster_id));
            extra.insert("cluster_size".into(), json!(members.len()));
            extra.insert("n_clusters_param".into(), json!(self.params.n_clusters));
            extra.insert("model_name".into(), json!(self.params.model_name));
            extra.insert("chunking_method".into(), json!("semantic_clustering"));
            extra.insert("text_length".into(), json!(text.len()));

            // members are pushed in row order, so the ends are the bounds
            let start = members[0];
            let end = members[members.len() - 1];
            metadata.push(
                ChunkMetadata::new(self.method(), chunk_index, start, end, rows.len())
                    .with_extra(extra),
            );
            chunks.push(Chunk {
                rows,
                text: Some(text),
            });
            chunk_index += 1;
        }

        tracing::debug!(
            clusters = chunks.len(),
            requested = self.params.n_clusters,
            "semantic clustering complete"
        );
        Ok(ChunkingResult::assemble(
            self.method(),
            dataset,
            chunks,
            metadata,
        ))
    }

    /// Contiguous equal-size blocks, the last absorbing the remainder so the
    /// fallback is a true partition of the dataset.
    fn block_chunks(&self, dataset: &Dataset, reason: FallbackReason) -> ChunkingResult {
        let total_rows = dataset.len();
        let n_clusters = self.params.n_clusters;
        let block = (total_rows / n_clusters).max(1);
        let sentences = Self::sentences(dataset);

        let mut chunks = Vec::new();
        let mut metadata = Vec::new();

        for i in 0..n_clusters {
            let start = i * block;
            if start >= total_rows {
                break;
            }
            let end = if i == n_clusters - 1 {
                total_rows
            } else {
                ((i + 1) * block).min(total_rows)
            };

            let rows = dataset.slice(start, end);
            let text = sentences[start..end].join(" ");

            let mut extra = serde_json::Map::new();
            extra.insert("cluster_id".into(), json!(i));
            extra.insert("cluster_size".into(), json!(rows.len()));
            extra.insert("n_clusters_param".into(), json!(n_clusters));
            extra.insert("chunking_method".into(), json!("semantic_fallback"));
            extra.insert("text_length".into(), json!(text.len()));

            metadata.push(
                ChunkMetadata::new(self.method(), i, start, end - 1, rows.len())
                    .with_extra(extra),
            );
            chunks.push(Chunk {
                rows,
                text: Some(text),
            });
        }

        ChunkingResult::assemble(self.method(), dataset, chunks, metadata).with_fallback(reason)
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::Semantic
    }

    async fn chunk(&self, dataset: &Dataset) -> Result<ChunkingResult, RagError> {
        dataset.validate()?;
        if self.params.n_clusters == 0 {
            return Err(RagError::InvalidParameter(
                "n_clusters must be positive".into(),
            ));
        }

        let Some(embedder) = &self.embedder else {
            tracing::warn!("no embedding provider configured, using contiguous-block fallback");
            return Ok(self.block_chunks(dataset, FallbackReason::ClusteringUnavailable));
        };

        match self.cluster_chunks(dataset, embedder).await {
            Ok(result) => Ok(result),
            Err(err) => {
                tracing::warn!(error = %err, "semantic clustering failed, using fallback");
                Ok(self.block_chunks(
                    dataset,
                    FallbackReason::ClusteringFailed {
                        detail: err.to_string(),
                    },
                ))
            }
        }
    }
}
