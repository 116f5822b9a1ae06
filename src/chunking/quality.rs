//! Chunk quality assessment.
//!
//! A pure, diagnostic scoring pass over a finished set of chunks. It never
//! fails: an empty chunk list degrades the report instead of erroring, since
//! the assessment is advisory rather than a gate.

use serde::{Deserialize, Serialize};

use super::Chunk;

/// Quality bands over the score, ordered worst to best.
///
/// Band thresholds: `Fair` at 0.4, `Good` at 0.6, `Excellent` at 0.8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityBand {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityBand::Excellent
        } else if score >= 0.6 {
            QualityBand::Good
        } else if score >= 0.4 {
            QualityBand::Fair
        } else {
            QualityBand::Poor
        }
    }
}

impl std::fmt::Display for QualityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QualityBand::Poor => "POOR",
            QualityBand::Fair => "FAIR",
            QualityBand::Good => "GOOD",
            QualityBand::Excellent => "EXCELLENT",
        };
        f.write_str(label)
    }
}

/// Chunk size distribution over one result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    pub mean: f64,
    pub std: f64,
    pub variance: f64,
    pub min: usize,
    pub max: usize,
}

/// Structural problems found while assessing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssues {
    pub empty_chunks: usize,
    /// Chunks of fewer than 3 rows.
    pub very_small_chunks: usize,
    /// Chunks covering more than 80% of the source rows.
    pub very_large_chunks: usize,
}

/// The quality summary attached to every [`super::ChunkingResult`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall_quality: QualityBand,
    pub quality_score: f64,
    /// Fraction of source rows represented across all chunks.
    pub coverage: f64,
    pub total_chunks: usize,
    pub total_rows_processed: usize,
    pub original_rows: usize,
    pub size_stats: Option<SizeStats>,
    pub issues: QualityIssues,
    /// Set when the chunk list was empty and nothing could be measured.
    pub no_chunks: bool,
}

/// Score a set of chunks against the source row count.
///
/// The score starts at 1.0 and is penalized for: coverage below 0.95
/// (`2 * (0.95 - coverage)`), each empty chunk (0.1), each very-small chunk
/// (0.05), each very-large chunk (0.2), and a size spread where the standard
/// deviation exceeds half the mean (flat 0.1). The result is clamped to
/// `[0, 1]` and banded per [`QualityBand::from_score`].
pub fn assess(chunks: &[Chunk], original_rows: usize) -> QualityReport {
    if chunks.is_empty() {
        return QualityReport {
            overall_quality: QualityBand::Poor,
            quality_score: 0.0,
            coverage: 0.0,
            total_chunks: 0,
            total_rows_processed: 0,
            original_rows,
            size_stats: None,
            issues: QualityIssues::default(),
            no_chunks: true,
        };
    }

    let sizes: Vec<usize> = chunks.iter().map(Chunk::row_count).collect();
    let total_rows_processed: usize = sizes.iter().sum();
    let coverage = if original_rows > 0 {
        total_rows_processed as f64 / original_rows as f64
    } else {
        0.0
    };

    let mean = total_rows_processed as f64 / sizes.len() as f64;
    let variance = sizes
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / sizes.len() as f64;
    let std = variance.sqrt();

    let issues = QualityIssues {
        empty_chunks: chunks.iter().filter(|c| c.row_count() == 0).count(),
        very_small_chunks: sizes.iter().filter(|&&s| s < 3).count(),
        very_large_chunks: sizes
            .iter()
            .filter(|&&s| (s as f64) > original_rows as f64 * 0.8)
            .count(),
    };

    let mut score = 1.0;
    if coverage < 0.95 {
        score -= (0.95 - coverage) * 2.0;
    }
    score -= issues.empty_chunks as f64 * 0.1;
    score -= issues.very_small_chunks as f64 * 0.05;
    score -= issues.very_large_chunks as f64 * 0.2;
    if std > mean * 0.5 {
        score -= 0.1;
    }
    let quality_score = score.clamp(0.0, 1.0);

    QualityReport {
        overall_quality: QualityBand::from_score(quality_score),
        quality_score,
        coverage,
        total_chunks: chunks.len(),
        total_rows_processed,
        original_rows,
        size_stats: Some(SizeStats {
            mean,
            std,
            variance,
            min: sizes.iter().copied().min().unwrap_or(0),
            max: sizes.iter().copied().max().unwrap_or(0),
        }),
        issues,
        no_chunks: false,
    }
}
