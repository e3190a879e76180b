//! Per-label aggregation of memory matches
//!
//! Scans every exemplar, drops those failing the weak-similarity gate and
//! aggregates the rest by label. Statistics are computed fresh per query.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::exemplar::Exemplar;
use crate::similarity::{Similarity, SimilarityEngine};
use crate::thresholds::ThresholdPolicy;

/// Pointer back to the exemplar that produced a statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExemplarRef {
    /// Position in the store's insertion order
    pub index: usize,
    pub source_reference: String,
}

/// Aggregate similarity of a query to all gated exemplars of one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelStatistics {
    pub example_count: usize,
    pub best_euclidean: f32,
    pub best_cosine: f32,
    pub mean_euclidean: f32,
    /// Population standard deviation; 0 for a single example
    pub std_euclidean: f32,
    pub mean_combined: f32,
    pub max_combined: f32,
    /// Exemplar with the smallest euclidean distance
    pub best_exemplar: ExemplarRef,
}

impl LabelStatistics {
    /// Aggregate a non-empty set of matches; `None` when empty
    fn from_matches(matches: &[(usize, &Exemplar, Similarity)]) -> Option<Self> {
        let (first_index, first_exemplar, first_sim) = matches.first()?;
        let n = matches.len() as f32;

        let mut best_index = *first_index;
        let mut best_source = *first_exemplar;
        let mut best_euclidean = first_sim.euclidean;
        let mut best_cosine = f32::MIN;
        let mut max_combined = f32::MIN;
        let mut sum_euclidean = 0.0_f32;
        let mut sum_combined = 0.0_f32;

        for (index, exemplar, sim) in matches {
            if sim.euclidean < best_euclidean {
                best_euclidean = sim.euclidean;
                best_index = *index;
                best_source = *exemplar;
            }
            best_cosine = best_cosine.max(sim.cosine);
            max_combined = max_combined.max(sim.combined);
            sum_euclidean += sim.euclidean;
            sum_combined += sim.combined;
        }

        let mean_euclidean = sum_euclidean / n;
        let variance = matches
            .iter()
            .map(|(_, _, sim)| (sim.euclidean - mean_euclidean).powi(2))
            .sum::<f32>()
            / n;

        Some(Self {
            example_count: matches.len(),
            best_euclidean,
            best_cosine,
            mean_euclidean,
            std_euclidean: if matches.len() == 1 { 0.0 } else { variance.sqrt() },
            mean_combined: sum_combined / n,
            max_combined,
            best_exemplar: ExemplarRef {
                index: best_index,
                source_reference: best_source.source_reference.clone(),
            },
        })
    }
}

/// Label -> statistics, ordered by label for deterministic tie-breaking
pub type LabelStatisticsMap = BTreeMap<String, LabelStatistics>;

/// Produces per-label statistics for a query embedding
pub struct MemoryAnalyzer<'a> {
    policy: &'a ThresholdPolicy,
    similarity: &'a SimilarityEngine,
}

impl<'a> MemoryAnalyzer<'a> {
    pub fn new(policy: &'a ThresholdPolicy, similarity: &'a SimilarityEngine) -> Self {
        Self { policy, similarity }
    }

    /// Full scan of `exemplars`; labels with no gated exemplar are absent
    pub fn analyze(&self, query: &[f32], exemplars: &[Exemplar]) -> Result<LabelStatisticsMap> {
        if let Some(first) = exemplars.first() {
            if first.dimension() != query.len() {
                return Err(MemoryError::dimension_mismatch(
                    first.dimension(),
                    query.len(),
                ));
            }
        }

        let mut by_label: BTreeMap<&str, Vec<(usize, &Exemplar, Similarity)>> = BTreeMap::new();
        for (index, exemplar) in exemplars.iter().enumerate() {
            let sim = self.similarity.measure(query, &exemplar.embedding)?;
            if !self.policy.passes_weak_gate(sim.euclidean, sim.cosine) {
                continue;
            }
            by_label
                .entry(exemplar.label.as_str())
                .or_default()
                .push((index, exemplar, sim));
        }

        let stats: LabelStatisticsMap = by_label
            .into_iter()
            .filter_map(|(label, matches)| {
                LabelStatistics::from_matches(&matches).map(|s| (label.to_string(), s))
            })
            .collect();

        log::debug!(
            "Analyzed {} exemplars: {} candidate labels",
            exemplars.len(),
            stats.len()
        );
        Ok(stats)
    }
}
