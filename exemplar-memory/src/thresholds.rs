//! Distance and similarity cutoffs
//!
//! One immutable policy per engine instance. Per-label overrides replace the
//! very-similar cutoffs for a single label and declare which other labels it
//! is visually confusable with.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Override for a single label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOverride {
    /// Very-similar euclidean cutoff for this label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub euclidean_cutoff: Option<f32>,
    /// Very-similar cosine cutoff for this label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosine_cutoff: Option<f32>,
    /// Labels this one is easily mistaken for
    pub confusable_labels: BTreeSet<String>,
}

impl LabelOverride {
    pub fn with_cutoffs(mut self, euclidean: f32, cosine: f32) -> Self {
        self.euclidean_cutoff = Some(euclidean);
        self.cosine_cutoff = Some(cosine);
        self
    }

    pub fn confusable_with<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.confusable_labels
            .extend(labels.into_iter().map(Into::into));
        self
    }
}

/// Resolved very-similar cutoffs for one label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cutoffs {
    pub euclidean: f32,
    pub cosine: f32,
}

/// Threshold configuration shared by every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    /// Below this distance two embeddings are the same subject (default: 5.0)
    pub exact_duplicate_euclidean: f32,
    /// Insertion: below this distance a new exemplar is a variation (default: 15.0)
    pub similar_euclidean: f32,
    /// Default very-similar euclidean cutoff (default: 12.0)
    pub very_similar_euclidean: f32,
    /// Default very-similar cosine cutoff (default: 0.85)
    pub very_similar_cosine: f32,
    /// Cosine above which a match is treated as near-exact (default: 0.97)
    pub exact_cosine: f32,
    /// Exemplars farther than this and below the cosine floor are ignored (default: 25.0)
    pub weak_euclidean: f32,
    /// Cosine floor of the weak-similarity gate (default: 0.70)
    pub weak_cosine: f32,
    /// Per-label overrides
    pub overrides: HashMap<String, LabelOverride>,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            exact_duplicate_euclidean: 5.0,
            similar_euclidean: 15.0,
            very_similar_euclidean: 12.0,
            very_similar_cosine: 0.85,
            exact_cosine: 0.97,
            weak_euclidean: 25.0,
            weak_cosine: 0.70,
            overrides: HashMap::new(),
        }
    }
}

impl ThresholdPolicy {
    /// Add or replace the override for `label`
    pub fn with_override(mut self, label: impl Into<String>, entry: LabelOverride) -> Self {
        self.overrides.insert(label.into(), entry);
        self
    }

    /// Very-similar cutoffs for `label`, falling back to the defaults
    pub fn cutoffs_for(&self, label: &str) -> Cutoffs {
        let entry = self.overrides.get(label);
        Cutoffs {
            euclidean: entry
                .and_then(|o| o.euclidean_cutoff)
                .unwrap_or(self.very_similar_euclidean),
            cosine: entry
                .and_then(|o| o.cosine_cutoff)
                .unwrap_or(self.very_similar_cosine),
        }
    }

    /// Symmetric: true if either label's override lists the other
    pub fn is_confusable(&self, a: &str, b: &str) -> bool {
        let lists = |from: &str, to: &str| {
            self.overrides
                .get(from)
                .is_some_and(|o| o.confusable_labels.contains(to))
        };
        lists(a, b) || lists(b, a)
    }

    /// Whether a (distance, cosine) pair passes the weak-similarity gate
    pub fn passes_weak_gate(&self, euclidean: f32, cosine: f32) -> bool {
        euclidean <= self.weak_euclidean || cosine >= self.weak_cosine
    }

    pub fn is_exact_duplicate(&self, euclidean: f32) -> bool {
        euclidean < self.exact_duplicate_euclidean
    }

    /// Check cutoff ordering and ranges
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("exact_duplicate_euclidean", self.exact_duplicate_euclidean),
            ("similar_euclidean", self.similar_euclidean),
            ("very_similar_euclidean", self.very_similar_euclidean),
            ("weak_euclidean", self.weak_euclidean),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MemoryError::invalid_config(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        if self.exact_duplicate_euclidean >= self.very_similar_euclidean {
            return Err(MemoryError::invalid_config(
                "exact_duplicate_euclidean must be tighter than very_similar_euclidean",
            ));
        }
        if self.exact_duplicate_euclidean >= self.similar_euclidean {
            return Err(MemoryError::invalid_config(
                "exact_duplicate_euclidean must be tighter than similar_euclidean",
            ));
        }

        let cosines = [
            ("very_similar_cosine", self.very_similar_cosine),
            ("exact_cosine", self.exact_cosine),
            ("weak_cosine", self.weak_cosine),
        ];
        for (name, value) in cosines {
            if !(-1.0..=1.0).contains(&value) {
                return Err(MemoryError::invalid_config(format!(
                    "{name} must lie in [-1, 1], got {value}"
                )));
            }
        }

        for (label, entry) in &self.overrides {
            if let Some(e) = entry.euclidean_cutoff {
                if e <= self.exact_duplicate_euclidean {
                    return Err(MemoryError::invalid_config(format!(
                        "override for {label}: euclidean_cutoff must exceed the duplicate cutoff"
                    )));
                }
            }
            if let Some(c) = entry.cosine_cutoff {
                if !(-1.0..=1.0).contains(&c) {
                    return Err(MemoryError::invalid_config(format!(
                        "override for {label}: cosine_cutoff must lie in [-1, 1]"
                    )));
                }
            }
        }

        Ok(())
    }
}
