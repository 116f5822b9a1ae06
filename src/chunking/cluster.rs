//! Seeded k-means over embedding vectors.
//!
//! Deterministic for a given `(vectors, k, seed)`: centroid seeding uses a
//! [`StdRng`] and the iteration order is fixed, so the semantic chunker is
//! reproducible across runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::similarity::euclidean_distance_sq;
use crate::types::RagError;

const MAX_ITERATIONS: usize = 100;

/// Cluster `vectors` into `k` groups and return one label per vector.
///
/// Labels are the algorithm's own enumeration `0..k`; callers must not
/// assume any relation to input order. `k` must satisfy
/// `1 <= k <= vectors.len()` and all vectors must share a dimension.
pub fn kmeans(vectors: &[Vec<f32>], k: usize, seed: u64) -> Result<Vec<usize>, RagError> {
    if vectors.is_empty() {
        return Err(RagError::InvalidParameter(
            "cannot cluster an empty vector set".into(),
        ));
    }
    if k == 0 || k > vectors.len() {
        return Err(RagError::InvalidParameter(format!(
            "cluster count {k} must be in 1..={}",
            vectors.len()
        )));
    }
    let dim = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dim) {
        return Err(RagError::DimensionMismatch {
            expected: dim,
            actual: vectors
                .iter()
                .find(|v| v.len() != dim)
                .map(|v| v.len())
                .unwrap_or(dim),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = seed_centroids(vectors, k, &mut rng);
    let mut labels = vec![0usize; vectors.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let nearest = nearest_centroid(vector, &centroids);
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // recompute means; a cluster that lost all members keeps its centroid
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (vector, &label) in vectors.iter().zip(&labels) {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(vector) {
                *s += v;
            }
        }
        for (label, sum) in sums.into_iter().enumerate() {
            if counts[label] > 0 {
                centroids[label] = sum
                    .into_iter()
                    .map(|s| s / counts[label] as f32)
                    .collect();
            }
        }
    }

    Ok(labels)
}

/// k-means++ seeding: spread the initial centroids proportionally to the
/// squared distance from those already chosen.
fn seed_centroids(vectors: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(vectors[rng.random_range(0..vectors.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = vectors
            .iter()
            .map(|v| {
                centroids
                    .iter()
                    .map(|c| euclidean_distance_sq(v, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let next = pick_weighted(rng, &weights);
        centroids.push(vectors[next].clone());
    }
    centroids
}

fn pick_weighted(rng: &mut StdRng, weights: &[f32]) -> usize {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return rng.random_range(0..weights.len());
    }
    let mut target = rng.random_range(0.0..total);
    for (idx, &weight) in weights.iter().enumerate() {
        if target < weight {
            return idx;
        }
        target -= weight;
    }
    weights.len() - 1
}

fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = euclidean_distance_sq(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}
