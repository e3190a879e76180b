//! Pairwise similarity metrics between embeddings
//!
//! Euclidean distance (lower = closer), cosine similarity (higher = closer)
//! and a combined score in [0, 1] blending both.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Weights for the combined similarity score
///
/// `combined = euclidean_weight * 1 / (1 + euclidean / euclidean_scale)
///           + cosine_weight * cosine`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    /// Weight of the distance-derived term (default: 0.4)
    pub euclidean_weight: f32,
    /// Weight of cosine similarity (default: 0.6)
    pub cosine_weight: f32,
    /// Distance at which the distance term halves (default: 10.0)
    pub euclidean_scale: f32,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            euclidean_weight: 0.4,
            cosine_weight: 0.6,
            euclidean_scale: 10.0,
        }
    }
}

/// All three metrics for one (query, exemplar) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub euclidean: f32,
    pub cosine: f32,
    pub combined: f32,
}

/// Computes similarity metrics with a fixed weighting
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    weights: SimilarityWeights,
}

impl SimilarityEngine {
    pub fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    /// Euclidean, cosine and combined score in one pass
    pub fn measure(&self, a: &[f32], b: &[f32]) -> Result<Similarity> {
        check_dimensions(a, b)?;

        let mut dot = 0.0_f32;
        let mut norm_a = 0.0_f32;
        let mut norm_b = 0.0_f32;
        let mut dist_sq = 0.0_f32;
        for (x, y) in a.iter().zip(b.iter()) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
            let d = x - y;
            dist_sq += d * d;
        }

        let euclidean = dist_sq.sqrt();
        let cosine = cosine_from_parts(dot, norm_a, norm_b);
        Ok(Similarity {
            euclidean,
            cosine,
            combined: self.combined(euclidean, cosine),
        })
    }

    /// Blend a distance and a cosine into the combined score, clamped to [0, 1]
    pub fn combined(&self, euclidean: f32, cosine: f32) -> f32 {
        let w = &self.weights;
        let distance_term = 1.0 / (1.0 + euclidean / w.euclidean_scale);
        (w.euclidean_weight * distance_term + w.cosine_weight * cosine).clamp(0.0, 1.0)
    }
}

/// L2 norm of the difference vector
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a, b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

/// Calculate cosine similarity between two vectors
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a, b)?;

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum();
    let norm_b: f32 = b.iter().map(|x| x * x).sum();
    Ok(cosine_from_parts(dot, norm_a, norm_b))
}

fn cosine_from_parts(dot: f32, norm_a_sq: f32, norm_b_sq: f32) -> f32 {
    if norm_a_sq == 0.0 || norm_b_sq == 0.0 {
        0.0
    } else {
        (dot / (norm_a_sq.sqrt() * norm_b_sq.sqrt())).clamp(-1.0, 1.0)
    }
}

fn check_dimensions(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(MemoryError::dimension_mismatch(a.len(), b.len()));
    }
    Ok(())
}
