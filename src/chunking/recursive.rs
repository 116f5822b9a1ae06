//! Character-budgeted recursive splitting over a serialized dataset.
//!
//! Rows are rendered to `"col: value | col: value"` lines and joined into one
//! corpus string. The primary path (feature `recursive-splitter`, on by
//! default) walks a separator ladder (paragraph, line, word, character)
//! and packs the resulting fragments into segments of at most `chunk_size`
//! characters, carrying `overlap` characters of trailing context into the
//! next segment. Without the feature, a fallback accumulates whole rows
//! against the same character budget.
//!
//! Overlap is character-budgeted on both paths: the fallback seeds each new
//! buffer with as many trailing whole rows as fit within `overlap`
//! characters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dataset::Dataset;
use crate::types::RagError;

use super::{Chunk, ChunkMetadata, ChunkMethod, Chunker, ChunkingResult, row_pairs};

#[cfg(not(feature = "recursive-splitter"))]
use super::FallbackReason;

/// Parameters for [`RecursiveChunker`]. Both values are measured in
/// characters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecursiveParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for RecursiveParams {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            overlap: 50,
        }
    }
}

impl RecursiveParams {
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

/// Splits the serialized dataset into character-budgeted text segments.
pub struct RecursiveChunker {
    params: RecursiveParams,
}

impl RecursiveChunker {
    pub fn new(params: RecursiveParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::Recursive
    }

    async fn chunk(&self, dataset: &Dataset) -> Result<ChunkingResult, RagError> {
        dataset.validate()?;
        self.params.validate()?;

        #[cfg(feature = "recursive-splitter")]
        {
            Ok(self.chunk_with_splitter(dataset))
        }
        #[cfg(not(feature = "recursive-splitter"))]
        {
            tracing::warn!("recursive splitter compiled out, accumulating whole rows instead");
            let (chunks, metadata) = accumulate_rows(dataset, &self.params);
            Ok(
                ChunkingResult::assemble(self.method(), dataset, chunks, metadata)
                    .with_fallback(FallbackReason::SplitterUnavailable),
            )
        }
    }
}

impl RecursiveChunker {
    #[cfg(feature = "recursive-splitter")]
    fn chunk_with_splitter(&self, dataset: &Dataset) -> ChunkingResult {
        let corpus = row_texts(dataset).join("\n");
        let segments = split_recursive(&corpus, self.params.chunk_size, self.params.overlap);

        let mut chunks = Vec::with_capacity(segments.len());
        let mut metadata = Vec::with_capacity(segments.len());
        for (chunk_index, segment) in segments.into_iter().enumerate() {
            let mut extra = serde_json::Map::new();
            extra.insert("chunk_size_param".into(), json!(self.params.chunk_size));
            extra.insert("overlap".into(), json!(self.params.overlap));
            extra.insert("text_length".into(), json!(segment.len()));
            extra.insert("chunking_method".into(), json!("recursive_split"));

            // Text segments no longer address exact rows; 0..0 is a
            // placeholder marker over the corpus.
            metadata.push(
                ChunkMetadata::new(self.method(), chunk_index, 0, 0, 1).with_extra(extra),
            );
            chunks.push(Chunk::from_text(segment));
        }

        tracing::debug!(
            chunks = chunks.len(),
            chunk_size = self.params.chunk_size,
            "recursive chunking complete"
        );
        ChunkingResult::assemble(self.method(), dataset, chunks, metadata)
    }
}

/// Render each row as a `"col: value | col: value"` line, omitting nulls.
fn row_texts(dataset: &Dataset) -> Vec<String> {
    dataset
        .rows()
        .iter()
        .map(|row| row_pairs(dataset.columns(), row).join(" | "))
        .collect()
}

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

struct Fragment {
    lead: &'static str,
    text: String,
}

/// Split `corpus` into segments of at most `chunk_size` characters, carrying
/// `overlap` trailing characters into the next segment where they fit.
#[cfg_attr(not(feature = "recursive-splitter"), allow(dead_code))]
fn split_recursive(corpus: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut fragments = Vec::new();
    collect_fragments(corpus, &SEPARATORS, "", chunk_size, &mut fragments);

    let mut segments = Vec::new();
    let mut buf = String::new();
    for fragment in fragments {
        if !buf.is_empty()
            && buf.len() + fragment.lead.len() + fragment.text.len() > chunk_size
        {
            let tail = overlap_tail(&buf, overlap);
            segments.push(std::mem::take(&mut buf));
            if tail.len() + fragment.lead.len() + fragment.text.len() <= chunk_size {
                buf = tail;
            }
        }
        if !buf.is_empty() {
            buf.push_str(fragment.lead);
        }
        buf.push_str(&fragment.text);
    }
    if !buf.is_empty() {
        segments.push(buf);
    }
    segments
}

/// Descend the separator ladder until every fragment fits the budget; the
/// character level is the last resort and always succeeds.
fn collect_fragments(
    text: &str,
    separators: &[&'static str],
    lead: &'static str,
    chunk_size: usize,
    out: &mut Vec<Fragment>,
) {
    if text.is_empty() {
        return;
    }
    if text.len() <= chunk_size {
        out.push(Fragment {
            lead,
            text: text.to_string(),
        });
        return;
    }
    if let Some((sep, rest)) = separators.split_first() {
        let mut piece_lead = lead;
        for piece in text.split(sep) {
            collect_fragments(piece, rest, piece_lead, chunk_size, out);
            piece_lead = sep;
        }
    } else {
        let mut buf = String::new();
        let mut piece_lead = lead;
        for ch in text.chars() {
            if buf.len() + ch.len_utf8() > chunk_size {
                out.push(Fragment {
                    lead: piece_lead,
                    text: std::mem::take(&mut buf),
                });
                piece_lead = "";
            }
            buf.push(ch);
        }
        if !buf.is_empty() {
            out.push(Fragment {
                lead: piece_lead,
                text: buf,
            });
        }
    }
}

/// Trailing `overlap` characters of `s`, aligned to a char boundary.
fn overlap_tail(s: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let mut start = s.len().saturating_sub(overlap);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Row-accumulating path: grow a buffer of whole rows, emit when the next
/// row would exceed `chunk_size` characters, and seed the next buffer with
/// trailing rows totalling at most `overlap` characters.
#[cfg_attr(feature = "recursive-splitter", allow(dead_code))]
fn accumulate_rows(
    dataset: &Dataset,
    params: &RecursiveParams,
) -> (Vec<Chunk>, Vec<ChunkMetadata>) {
    let texts = row_texts(dataset);

    let mut chunks = Vec::new();
    let mut metadata = Vec::new();
    let mut chunk_index = 0;

    let mut current: Vec<usize> = Vec::new();
    let mut current_chars = 0usize;

    let mut emit = |indices: &[usize], chars: usize, chunk_index: usize| {
        let rows: Vec<_> = indices
            .iter()
            .filter_map(|&i| dataset.row(i).cloned())
            .collect();

        let mut extra = serde_json::Map::new();
        extra.insert("chunk_size_param".into(), json!(params.chunk_size));
        extra.insert("overlap".into(), json!(params.overlap));
        extra.insert("text_length".into(), json!(chars));
        extra.insert("chunking_method".into(), json!("recursive_fallback"));

        metadata.push(
            ChunkMetadata::new(
                ChunkMethod::Recursive,
                chunk_index,
                indices[0],
                indices[indices.len() - 1],
                rows.len(),
            )
            .with_extra(extra),
        );
        chunks.push(Chunk::from_rows(rows));
    };

    for (idx, text) in texts.iter().enumerate() {
        if !current.is_empty() && current_chars + text.len() > params.chunk_size {
            emit(&current, current_chars, chunk_index);
            chunk_index += 1;

            // carry trailing whole rows worth at most `overlap` characters
            let mut kept = Vec::new();
            let mut kept_chars = 0;
            for &prev in current.iter().rev() {
                let len = texts[prev].len();
                if kept_chars + len > params.overlap {
                    break;
                }
                kept.push(prev);
                kept_chars += len;
            }
            kept.reverse();
            current = kept;
            current_chars = kept_chars;
        }
        current.push(idx);
        current_chars += text.len() + 1;
    }
    if !current.is_empty() {
        emit(&current, current_chars, chunk_index);
    }

    (chunks, metadata)
}
