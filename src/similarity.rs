//! Similarity metrics and the vector math shared by the stores, the k-means
//! routine, and the retriever.
//!
//! All functions operate on plain `&[f32]` slices and carry no state. Scores
//! follow the "higher is more similar" convention; [`euclidean_similarity`]
//! folds the distance into `1 / (1 + d)` so it ranks the same way.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::RagError;

/// Small epsilon guarding divisions by near-zero norms.
const NORM_EPSILON: f32 = 1e-8;

/// The closed set of supported similarity metrics.
///
/// The metric selects both the comparison function and the per-backend score
/// normalization applied by the retriever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    Dot,
    Euclidean,
}

impl SimilarityMetric {
    pub const ALL: [SimilarityMetric; 3] = [
        SimilarityMetric::Cosine,
        SimilarityMetric::Dot,
        SimilarityMetric::Euclidean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Dot => "dot",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "dot" | "dot_product" => Ok(SimilarityMetric::Dot),
            "euclidean" => Ok(SimilarityMetric::Euclidean),
            other => Err(RagError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// Inner product of two vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean (L2) norm.
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Return an L2-normalized copy of `v`. A zero vector is returned unchanged.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n > 0.0 {
        v.iter().map(|x| x / n).collect()
    } else {
        v.to_vec()
    }
}

/// Cosine similarity with epsilon-guarded norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    dot(a, b) / ((norm(a) + NORM_EPSILON) * (norm(b) + NORM_EPSILON))
}

/// Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_sq(a, b).sqrt()
}

/// Squared euclidean distance; avoids the sqrt where only ordering matters.
pub fn euclidean_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance folded into a similarity: `1 / (1 + d)`.
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> f32 {
    1.0 / (1.0 + euclidean_distance(a, b))
}

/// Score a pair of vectors under the given metric (higher is more similar).
pub fn score(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        SimilarityMetric::Cosine => cosine_similarity(a, b),
        SimilarityMetric::Dot => dot(a, b),
        SimilarityMetric::Euclidean => euclidean_similarity(a, b),
    }
}
