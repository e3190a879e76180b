//! Correction path: skip, relabel or append
//!
//! A correction is matched against the single closest exemplar by plain
//! euclidean distance. Below the exact-duplicate cutoff the correction is
//! either already known or fixes an earlier mistake on the same subject;
//! anything further away is appended.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exemplar::{validate_embedding, validate_label, Exemplar};
use crate::similarity::euclidean_distance;
use crate::thresholds::ThresholdPolicy;

/// What a correction did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStatus {
    Skipped,
    Updated,
    Added,
}

/// Result of one correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutcome {
    pub status: CorrectionStatus,
    pub message: String,
}

impl fmt::Display for CorrectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.status, self.message)
    }
}

/// Planned mutation for a correction, before it is applied
#[derive(Debug, Clone, PartialEq)]
pub enum InsertionAction {
    /// Closest exemplar is a duplicate with the same label
    Skip { index: usize },
    /// Closest exemplar is a duplicate with another label
    Update { index: usize, previous_label: String },
    /// Same subject seen from a different angle
    AddVariation { distance: f32 },
    /// Nothing similar stored; `None` when the store is empty
    AddUnique { closest: Option<f32> },
}

impl InsertionAction {
    pub fn status(&self) -> CorrectionStatus {
        match self {
            Self::Skip { .. } => CorrectionStatus::Skipped,
            Self::Update { .. } => CorrectionStatus::Updated,
            Self::AddVariation { .. } | Self::AddUnique { .. } => CorrectionStatus::Added,
        }
    }

    fn message(&self, label: &str) -> String {
        match self {
            Self::Skip { .. } => "Duplicate detected.".to_string(),
            Self::Update { previous_label, .. } => {
                format!("Updating label from {previous_label} to {label}.")
            }
            Self::AddVariation { distance } => format!("Adding variation (dist: {distance:.2})."),
            Self::AddUnique { closest: Some(_) } => "New unique reference.".to_string(),
            Self::AddUnique { closest: None } => "First reference.".to_string(),
        }
    }
}

/// Decides how a correction changes the store
pub struct InsertionPolicy<'a> {
    policy: &'a ThresholdPolicy,
}

impl<'a> InsertionPolicy<'a> {
    pub fn new(policy: &'a ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Classify a correction against `exemplars` without mutating anything
    pub fn plan(&self, embedding: &[f32], label: &str, exemplars: &[Exemplar]) -> Result<InsertionAction> {
        let Some((index, distance)) = closest(embedding, exemplars)? else {
            return Ok(InsertionAction::AddUnique { closest: None });
        };

        let action = if distance < self.policy.exact_duplicate_euclidean {
            let existing = &exemplars[index];
            if existing.label == label {
                InsertionAction::Skip { index }
            } else {
                InsertionAction::Update {
                    index,
                    previous_label: existing.label.clone(),
                }
            }
        } else if distance < self.policy.similar_euclidean {
            InsertionAction::AddVariation { distance }
        } else {
            InsertionAction::AddUnique {
                closest: Some(distance),
            }
        };
        Ok(action)
    }

    /// Plan and apply a correction to `exemplars`
    ///
    /// Returns the outcome and whether the sequence changed.
    pub fn apply(
        &self,
        exemplars: &mut Vec<Exemplar>,
        embedding: Vec<f32>,
        label: &str,
        source_reference: &str,
    ) -> Result<(CorrectionOutcome, bool)> {
        let label = validate_label(label.to_string())?;
        validate_embedding(&embedding)?;

        let action = self.plan(&embedding, &label, exemplars)?;
        let outcome = CorrectionOutcome {
            status: action.status(),
            message: action.message(&label),
        };

        let changed = match action {
            InsertionAction::Skip { .. } => false,
            InsertionAction::Update { index, .. } => {
                exemplars[index].relabel(label)?;
                true
            }
            InsertionAction::AddVariation { .. } | InsertionAction::AddUnique { .. } => {
                exemplars.push(
                    Exemplar::builder()
                        .label(label)
                        .embedding(embedding)
                        .source_reference(source_reference)
                        .build()?,
                );
                true
            }
        };

        log::info!("Correction {:?}: {}", outcome.status, outcome.message);
        Ok((outcome, changed))
    }
}

/// Index and distance of the nearest exemplar; earliest wins ties
fn closest(embedding: &[f32], exemplars: &[Exemplar]) -> Result<Option<(usize, f32)>> {
    let mut best: Option<(usize, f32)> = None;
    for (index, exemplar) in exemplars.iter().enumerate() {
        let distance = euclidean_distance(&exemplar.embedding, embedding)?;
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((index, distance));
        }
    }
    Ok(best)
}
