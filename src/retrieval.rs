//! Query-side retrieval: embed, query a backend, and normalize its native
//! distances into the similarity scale the caller asked for.
//!
//! Every backend reports a [`DistanceSpace`]; the conversion rules per
//! requested metric are:
//!
//! | metric    | L2 backend             | normalized-IP backend            |
//! |-----------|------------------------|----------------------------------|
//! | cosine    | `max(0, 1 - d/2)`      | score clamped to `[0, 1]`        |
//! | euclidean | `1 / (1 + d)`          | over-fetch 2×, `1 / (2 - d)`     |
//! | dot       | distance passed as-is  | passed as-is, imprecision warned |
//!
//! The L2 conversions are deliberate approximations of the exact metrics
//! (the backend indexed L2, not cosine) and are kept on that scale because
//! downstream consumers rank against it. Reranking and hybrid keyword
//! blending layer on top of plain search.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingProvider;
use crate::similarity::SimilarityMetric;
use crate::stores::{DistanceSpace, MetadataFilter, QueryHit, VectorStore};
use crate::types::RagError;

/// Upper bound on `top_k` accepted by every search entry point.
pub const MAX_TOP_K: usize = 100;

/// One ranked retrieval result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document: Option<String>,
    pub similarity_score: f32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Options for [`Retriever::search`].
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Result count, in `1..=100`.
    pub top_k: usize,
    pub metric: SimilarityMetric,
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            metric: SimilarityMetric::Cosine,
            filter: None,
        }
    }
}

/// Options for [`Retriever::search_with_rerank`].
#[derive(Clone, Debug)]
pub struct RerankOptions {
    pub top_k: usize,
    /// First-stage retrieval size; defaults to `min(top_k * 3, 50)`.
    pub initial_k: Option<usize>,
    pub metric: SimilarityMetric,
    pub rerank_metric: SimilarityMetric,
    pub filter: Option<MetadataFilter>,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            initial_k: None,
            metric: SimilarityMetric::Cosine,
            rerank_metric: SimilarityMetric::Cosine,
            filter: None,
        }
    }
}

/// Blend weights for hybrid search.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HybridWeights {
    pub keyword: f32,
    pub semantic: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            keyword: 0.3,
            semantic: 0.7,
        }
    }
}

/// Options for [`Retriever::search_hybrid`].
#[derive(Clone, Debug, Default)]
pub struct HybridOptions {
    pub top_k: usize,
    pub weights: HybridWeights,
    pub filter: Option<MetadataFilter>,
}

/// Embeds queries and searches whichever backend it was built over.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Embed a query text through the configured provider.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::ModelUnavailable("provider returned no vector".into()))
    }

    /// Search for the `top_k` most similar records under the requested
    /// metric.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, RagError> {
        let embedding = self.embed_query(query).await?;
        self.search_with_embedding(&embedding, options).await
    }

    /// Same as [`search`](Self::search) with a pre-computed query embedding.
    pub async fn search_with_embedding(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, RagError> {
        validate_top_k(options.top_k)?;
        let query_batch = vec![embedding.to_vec()];
        let queries: &[Vec<f32>] = &query_batch;

        match (self.store.distance_space(), options.metric) {
            (DistanceSpace::L2, metric) => {
                let hits = self
                    .store
                    .query(queries, options.top_k, options.filter.as_ref())
                    .await?;
                Ok(first_query(hits)
                    .into_iter()
                    .map(|hit| convert_l2(hit, metric))
                    .collect())
            }
            (DistanceSpace::NormalizedInnerProduct, SimilarityMetric::Cosine) => {
                let hits = self
                    .store
                    .query(queries, options.top_k, options.filter.as_ref())
                    .await?;
                Ok(first_query(hits)
                    .into_iter()
                    .map(|hit| to_hit(hit, |d| d.clamp(0.0, 1.0)))
                    .collect())
            }
            (DistanceSpace::NormalizedInnerProduct, SimilarityMetric::Euclidean) => {
                // over-fetch, convert, truncate: the conversion preserves the
                // inner-product ordering
                let fetch = (options.top_k * 2).min(MAX_TOP_K).max(options.top_k);
                let hits = self
                    .store
                    .query(queries, fetch, options.filter.as_ref())
                    .await?;
                Ok(first_query(hits)
                    .into_iter()
                    .map(|hit| {
                        to_hit(hit, |d| if d >= 2.0 { 0.01 } else { 1.0 / (2.0 - d) })
                    })
                    .take(options.top_k)
                    .collect())
            }
            (DistanceSpace::NormalizedInnerProduct, SimilarityMetric::Dot) => {
                tracing::warn!(
                    "dot-product scores over a normalizing index are not exact: \
                     stored vectors lost their magnitude"
                );
                let hits = self
                    .store
                    .query(queries, options.top_k, options.filter.as_ref())
                    .await?;
                Ok(first_query(hits).into_iter().map(|hit| to_hit(hit, |d| d)).collect())
            }
        }
    }

    /// Two-stage retrieval: fetch `initial_k` candidates, then keep `top_k`.
    ///
    /// When `rerank_metric` differs from the first-stage metric this is a
    /// documented pass-through: an exact rerank would need the raw stored
    /// embeddings, which no backend retains.
    pub async fn search_with_rerank(
        &self,
        query: &str,
        options: &RerankOptions,
    ) -> Result<Vec<SearchHit>, RagError> {
        validate_top_k(options.top_k)?;
        let initial_k = options
            .initial_k
            .unwrap_or_else(|| (options.top_k * 3).min(50))
            .clamp(options.top_k, MAX_TOP_K);

        let initial = self
            .search(
                query,
                &SearchOptions {
                    top_k: initial_k,
                    metric: options.metric,
                    filter: options.filter.clone(),
                },
            )
            .await?;

        if options.rerank_metric != options.metric {
            tracing::warn!(
                metric = %options.metric,
                rerank_metric = %options.rerank_metric,
                "exact reranking requires stored raw embeddings; returning the initial ranking"
            );
        }
        Ok(initial.into_iter().take(options.top_k).collect())
    }

    /// Blend a term-overlap keyword score into the cosine semantic score and
    /// re-rank by the combined value.
    pub async fn search_hybrid(
        &self,
        query: &str,
        options: &HybridOptions,
    ) -> Result<Vec<SearchHit>, RagError> {
        validate_top_k(options.top_k)?;
        let fetch = (options.top_k * 2).min(MAX_TOP_K).max(options.top_k);

        let mut hits = self
            .search(
                query,
                &SearchOptions {
                    top_k: fetch,
                    metric: SimilarityMetric::Cosine,
                    filter: options.filter.clone(),
                },
            )
            .await?;

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        for hit in &mut hits {
            let keyword_score = keyword_overlap(hit.document.as_deref(), &terms);
            hit.similarity_score = options.weights.semantic * hit.similarity_score
                + options.weights.keyword * keyword_score;
        }
        hits.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(options.top_k);
        Ok(hits)
    }
}

/// Fraction of query terms present in the document.
fn keyword_overlap(document: Option<&str>, terms: &[String]) -> f32 {
    let (Some(document), false) = (document, terms.is_empty()) else {
        return 0.0;
    };
    let haystack = document.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

fn validate_top_k(top_k: usize) -> Result<(), RagError> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(RagError::InvalidParameter(format!(
            "top_k must be in 1..={MAX_TOP_K}, got {top_k}"
        )));
    }
    Ok(())
}

fn first_query(mut results: Vec<Vec<QueryHit>>) -> Vec<QueryHit> {
    if results.is_empty() {
        Vec::new()
    } else {
        results.swap_remove(0)
    }
}

fn to_hit(hit: QueryHit, convert: impl Fn(f32) -> f32) -> SearchHit {
    SearchHit {
        id: hit.id,
        document: hit.document,
        similarity_score: convert(hit.distance),
        metadata: hit.metadata,
    }
}

/// Reinterpret a native L2 distance under the requested metric. The cosine
/// and euclidean forms are approximations on a stable scale, not exact
/// recomputations.
fn convert_l2(hit: QueryHit, metric: SimilarityMetric) -> SearchHit {
    match metric {
        SimilarityMetric::Cosine => to_hit(hit, |d| (1.0 - d / 2.0).max(0.0)),
        SimilarityMetric::Euclidean => to_hit(hit, |d| 1.0 / (1.0 + d)),
        SimilarityMetric::Dot => to_hit(hit, |d| d),
    }
}
