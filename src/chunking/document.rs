//! Document-based chunking: group rows by a key column, split oversized
//! groups against a token budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::{Dataset, scalar_text};
use crate::types::RagError;

use super::{
    Chunk, ChunkMetadata, ChunkMethod, Chunker, ChunkingResult, FallbackReason,
};

/// Parameters for [`DocumentBasedChunker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentParams {
    /// Column whose values define the groups. Required.
    pub key_column: String,
    /// Token budget per chunk; groups over it are sub-split.
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    /// Model whose tokenizer sizes the groups. Advisory: estimation falls
    /// back to a character heuristic when no tokenizer is available.
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Prefix each group's text with a header line of column names.
    #[serde(default = "default_preserve_headers")]
    pub preserve_headers: bool,
}

fn default_token_limit() -> usize {
    2000
}

fn default_model_name() -> String {
    "gpt-4".to_string()
}

fn default_preserve_headers() -> bool {
    true
}

impl DocumentParams {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            token_limit: default_token_limit(),
            model_name: default_model_name(),
            preserve_headers: default_preserve_headers(),
        }
    }
}

/// Token estimator: a real tokenizer when the feature is compiled in and the
/// encoding loads, otherwise the classic four-characters-per-token heuristic.
enum TokenEstimator {
    #[cfg(feature = "token-count-tiktoken")]
    Tiktoken(tiktoken_rs::CoreBPE),
    CharHeuristic,
}

impl TokenEstimator {
    fn for_model(model_name: &str) -> Self {
        #[cfg(feature = "token-count-tiktoken")]
        {
            if let Ok(bpe) = tiktoken_rs::get_bpe_from_model(model_name)
                .or_else(|_| tiktoken_rs::cl100k_base())
            {
                return TokenEstimator::Tiktoken(bpe);
            }
            tracing::warn!(model = model_name, "tokenizer unavailable, estimating from characters");
        }
        #[cfg(not(feature = "token-count-tiktoken"))]
        {
            let _ = model_name;
        }
        TokenEstimator::CharHeuristic
    }

    fn count(&self, text: &str) -> usize {
        match self {
            #[cfg(feature = "token-count-tiktoken")]
            TokenEstimator::Tiktoken(bpe) => bpe.encode_with_special_tokens(text).len(),
            TokenEstimator::CharHeuristic => text.len() / 4,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            #[cfg(feature = "token-count-tiktoken")]
            TokenEstimator::Tiktoken(_) => "tiktoken",
            TokenEstimator::CharHeuristic => "chars_div4",
        }
    }

    fn is_heuristic(&self) -> bool {
        matches!(self, TokenEstimator::CharHeuristic)
    }
}

/// Groups rows by `key_column` equality in first-seen order; groups whose
/// token estimate exceeds the budget are cut into `ceil(tokens / limit)`
/// contiguous sub-chunks of roughly equal row count.
///
/// Token estimation is advisory only: equal-row sub-splitting is not
/// guaranteed to land every sub-chunk strictly under the limit when row text
/// lengths vary widely.
pub struct DocumentBasedChunker {
    params: DocumentParams,
}

impl DocumentBasedChunker {
    pub fn new(params: DocumentParams) -> Self {
        Self { params }
    }

    fn group_text(&self, dataset: &Dataset, indices: &[usize]) -> String {
        let mut lines = Vec::with_capacity(indices.len() + 1);
        if self.params.preserve_headers {
            lines.push(dataset.columns().join(", "));
        }
        for &idx in indices {
            if let Some(row) = dataset.row(idx) {
                let values: Vec<String> = dataset
                    .columns()
                    .iter()
                    .map(|col| row.get(col).and_then(scalar_text).unwrap_or_default())
                    .collect();
                lines.push(values.join(", "));
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Chunker for DocumentBasedChunker {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::DocumentBased
    }

    async fn chunk(&self, dataset: &Dataset) -> Result<ChunkingResult, RagError> {
        dataset.validate()?;
        if self.params.token_limit == 0 {
            return Err(RagError::InvalidParameter(
                "token_limit must be positive".into(),
            ));
        }
        if !dataset.columns().contains(&self.params.key_column) {
            return Err(RagError::InvalidParameter(format!(
                "key column '{}' not found in dataset",
                self.params.key_column
            )));
        }

        let estimator = TokenEstimator::for_model(&self.params.model_name);

        // first-seen group order
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: rustc_hash::FxHashMap<String, Vec<usize>> = Default::default();
        for (idx, row) in dataset.rows().iter().enumerate() {
            let key = row
                .get(&self.params.key_column)
                .and_then(scalar_text)
                .unwrap_or_else(|| "null".to_string());
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    group_order.push(key.clone());
                    Vec::new()
                })
                .push(idx);
        }

        let mut chunks = Vec::new();
        let mut metadata = Vec::new();
        let mut chunk_index = 0;

        for key in &group_order {
            let indices = &groups[key];
            let text = self.group_text(dataset, indices);
            let token_count = estimator.count(&text);

            let base_extra = |extra: &mut serde_json::Map<String, serde_json::Value>| {
                extra.insert("key_column".into(), json!(self.params.key_column));
                extra.insert("key_value".into(), json!(key));
                extra.insert("chunking_method".into(), json!("document_based"));
                extra.insert("token_limit".into(), json!(self.params.token_limit));
                extra.insert("group_size".into(), json!(indices.len()));
                extra.insert("token_estimator".into(), json!(estimator.label()));
            };

            if token_count <= self.params.token_limit {
                let rows: Vec<_> = indices
                    .iter()
                    .filter_map(|&i| dataset.row(i).cloned())
                    .collect();

                let mut extra = serde_json::Map::new();
                base_extra(&mut extra);
                extra.insert("token_count".into(), json!(token_count));
                extra.insert("is_subchunk".into(), json!(false));

                metadata.push(
                    ChunkMetadata::new(
                        self.method(),
                        chunk_index,
                        indices[0],
                        indices[indices.len() - 1],
                        rows.len(),
                    )
                    .with_extra(extra),
                );
                chunks.push(Chunk::from_rows(rows));
                chunk_index += 1;
                continue;
            }

            // Oversized group: ceil(tokens / limit) contiguous sub-chunks of
            // roughly equal row count.
            let total_subchunks = token_count.div_ceil(self.params.token_limit);
            let sub_rows = (indices.len() / total_subchunks).max(1);

            for sub in 0..total_subchunks {
                let start = sub * sub_rows;
                if start >= indices.len() {
                    break;
                }
                let end = if sub == total_subchunks - 1 {
                    indices.len()
                } else {
                    ((sub + 1) * sub_rows).min(indices.len())
                };
                let sub_indices = &indices[start..end];
                let rows: Vec<_> = sub_indices
                    .iter()
                    .filter_map(|&i| dataset.row(i).cloned())
                    .collect();
                let sub_text = self.group_text(dataset, sub_indices);

                let mut extra = serde_json::Map::new();
                base_extra(&mut extra);
                extra.insert("token_count".into(), json!(estimator.count(&sub_text)));
                extra.insert("is_subchunk".into(), json!(true));
                extra.insert("subchunk_index".into(), json!(sub + 1));
                extra.insert("total_subchunks".into(), json!(total_subchunks));

                metadata.push(
                    ChunkMetadata::new(
                        self.method(),
                        chunk_index,
                        sub_indices[0],
                        sub_indices[sub_indices.len() - 1],
                        rows.len(),
                    )
                    .with_extra(extra),
                );
                chunks.push(Chunk::from_rows(rows));
                chunk_index += 1;
            }
        }

        tracing::debug!(
            groups = group_order.len(),
            chunks = chunks.len(),
            estimator = estimator.label(),
            "document-based chunking complete"
        );

        let result = ChunkingResult::assemble(self.method(), dataset, chunks, metadata);
        if estimator.is_heuristic() {
            Ok(result.with_fallback(FallbackReason::TokenizerUnavailable))
        } else {
            Ok(result)
        }
    }
}
