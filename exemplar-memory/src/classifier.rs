//! Classifier output at the engine boundary
//!
//! The classifier itself is external. Per query it hands over an embedding
//! and an ordered top-K label distribution; this module validates that
//! contract once so the rest of the engine can rely on it.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::exemplar::validate_embedding;

/// Tolerance on the sum of top-K confidences
const PROBABILITY_SLACK: f32 = 1e-3;

/// One entry of the classifier's label distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Validated classifier output for one query
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    embedding: Vec<f32>,
    top_k: Vec<LabelScore>,
}

impl ClassifierOutput {
    /// Validate, trim labels and sort `top_k` by descending confidence
    pub fn new(embedding: Vec<f32>, mut top_k: Vec<LabelScore>) -> Result<Self> {
        validate_embedding(&embedding)?;
        if top_k.is_empty() {
            return Err(MemoryError::invalid_prediction("top-K must not be empty"));
        }

        let mut total = 0.0_f32;
        for entry in &mut top_k {
            let trimmed = entry.label.trim();
            if trimmed.is_empty() {
                return Err(MemoryError::invalid_prediction("top-K label must not be empty"));
            }
            if trimmed.len() != entry.label.len() {
                entry.label = trimmed.to_string();
            }
            if !entry.confidence.is_finite() || !(0.0..=1.0).contains(&entry.confidence) {
                return Err(MemoryError::invalid_prediction(format!(
                    "confidence for {} must lie in [0, 1], got {}",
                    entry.label, entry.confidence
                )));
            }
            total += entry.confidence;
        }
        if total > 1.0 + PROBABILITY_SLACK {
            return Err(MemoryError::invalid_prediction(format!(
                "top-K confidences sum to {total:.4}, expected at most 1"
            )));
        }

        top_k.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(Self { embedding, top_k })
    }

    /// Build from raw class ids such as `n02099601-golden_retriever`
    pub fn from_class_ids<I, S>(embedding: Vec<f32>, scores: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f32)>,
        S: AsRef<str>,
    {
        let top_k = scores
            .into_iter()
            .map(|(id, confidence)| LabelScore::new(display_name(id.as_ref()), confidence))
            .collect();
        Self::new(embedding, top_k)
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    /// Distribution, highest confidence first
    pub fn top_k(&self) -> &[LabelScore] {
        &self.top_k
    }

    /// The classifier's prediction
    pub fn top(&self) -> &LabelScore {
        &self.top_k[0]
    }
}

/// Display label for a class id: drops a WordNet `n<digits>-` prefix and
/// turns underscores into spaces
pub fn display_name(raw: &str) -> String {
    let name = match raw.split_once('-') {
        Some((prefix, rest))
            if prefix.len() > 1
                && prefix.starts_with('n')
                && prefix[1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => raw,
    };
    name.replace('_', " ").trim().to_string()
}
