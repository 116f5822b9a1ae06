//! Embedding provider boundary.
//!
//! The embedding model itself is external to this crate: anything that can
//! turn a batch of texts into fixed-length vectors can implement
//! [`EmbeddingProvider`]. Failures surface as
//! [`RagError::ModelUnavailable`]; components with a degraded mode (the
//! semantic chunker) catch that and fall back, everything else propagates.
//!
//! [`MockEmbeddingProvider`] is a deterministic stand-in for tests and
//! offline runs: the same text always maps to the same vector.

use std::hash::Hasher;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;

use crate::types::RagError;

/// Synchronous-in-spirit embedding boundary: one batch of texts in, one
/// fixed-length vector per text out, in the same order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Human-readable provider/model name, recorded in result metadata.
    fn name(&self) -> &str;

    /// Dimension of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts.
    ///
    /// Implementations must return exactly one vector per input text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Deterministic hash-seeded embeddings for tests and offline pipelines.
///
/// Each text seeds a [`StdRng`] from its hash, so identical texts always get
/// identical vectors and distinct texts get (almost surely) distinct ones.
/// The vectors carry no semantic signal; they exist so the full
/// chunk-store-retrieve path can run without a model.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = FxHasher::default();
        hasher.write(text.as_bytes());
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0f32))
            .collect()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
