//! Confidence estimation for memory candidates
//!
//! Every candidate label is first placed in a [`MatchTier`] (first match wins):
//!
//! 1. best euclidean below the exact-duplicate cutoff
//! 2. best cosine above the cosine-exact cutoff
//! 3. max combined above `high_combined`
//! 4. best euclidean and best cosine inside the label's very-similar cutoffs
//! 5. max combined above `moderate_combined`
//! 6. anything else that passed the weak gate
//!
//! The tier drives two numbers: a calibrated confidence in [0.55, 1.0] that is
//! reported to callers, and a 0–100 memory score that decision fusion weighs
//! against the classifier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzer::{LabelStatistics, LabelStatisticsMap};
use crate::thresholds::ThresholdPolicy;

/// One step of a descending ramp: distances below `below` map to `value`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampStep {
    pub below: f32,
    pub value: f32,
}

/// Additive boost once a label has `min_examples` gated exemplars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountBoost {
    pub min_examples: usize,
    pub boost: f32,
}

/// Penalty once the euclidean spread exceeds `above`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadPenalty {
    pub above: f32,
    pub penalty: f32,
}

/// 0–100 memory score mapping used by decision fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryScoreScale {
    pub duplicate_ramp: Vec<RampStep>,
    /// Score for duplicates past the last ramp step
    pub duplicate_floor: f32,
    pub cosine_exact: f32,
    /// High-combined tier: `base + (max_combined - high_combined) * slope`, capped
    pub high_combined_base: f32,
    pub high_combined_slope: f32,
    pub high_combined_cap: f32,
    /// Very-similar tier ramps from `very_similar_max` at the duplicate cutoff
    /// down to `very_similar_min` at the label's very-similar cutoff
    pub very_similar_max: f32,
    pub very_similar_min: f32,
    pub moderate_combined_base: f32,
    pub moderate_combined_slope: f32,
    /// Weak tier: `weak_base + max(0, max_combined - weak_pivot) * weak_slope`
    pub weak_base: f32,
    pub weak_pivot: f32,
    pub weak_slope: f32,
    /// Bonus for labels with at least `bonus_min_examples` examples
    pub multi_example_bonus: f32,
    pub bonus_min_examples: usize,
    /// Scores at or above this are not boosted
    pub bonus_ceiling: f32,
}

impl Default for MemoryScoreScale {
    fn default() -> Self {
        Self {
            duplicate_ramp: vec![
                RampStep { below: 0.1, value: 100.0 },
                RampStep { below: 0.5, value: 99.5 },
                RampStep { below: 1.0, value: 99.0 },
                RampStep { below: 2.0, value: 98.5 },
                RampStep { below: 3.5, value: 98.0 },
            ],
            duplicate_floor: 97.0,
            cosine_exact: 96.0,
            high_combined_base: 88.0,
            high_combined_slope: 70.0,
            high_combined_cap: 95.0,
            very_similar_max: 88.0,
            very_similar_min: 80.0,
            moderate_combined_base: 75.0,
            moderate_combined_slope: 100.0,
            weak_base: 55.0,
            weak_pivot: 0.5,
            weak_slope: 50.0,
            multi_example_bonus: 5.0,
            bonus_min_examples: 3,
            bonus_ceiling: 99.0,
        }
    }
}

/// Tunable constants of the confidence estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceCalibration {
    /// Exact-duplicate ramp; past the last step the value falls linearly to
    /// `duplicate_floor` at the duplicate cutoff
    pub duplicate_ramp: Vec<RampStep>,
    pub duplicate_floor: f32,
    pub cosine_exact: f32,
    pub high_combined: f32,
    pub high_combined_confidence: f32,
    pub very_similar_confidence: f32,
    pub moderate_combined: f32,
    pub moderate_combined_confidence: f32,
    pub baseline_confidence: f32,
    /// Bases at or above this are already saturated and get no count boost;
    /// exact duplicates never get one
    pub boost_saturation: f32,
    pub count_boosts: Vec<CountBoost>,
    pub penalty_min_examples: usize,
    pub spread_penalties: Vec<SpreadPenalty>,
    pub min_confidence: f32,
    pub max_confidence: f32,
    pub score: MemoryScoreScale,
}

impl Default for ConfidenceCalibration {
    fn default() -> Self {
        Self {
            duplicate_ramp: vec![
                RampStep { below: 0.1, value: 1.00 },
                RampStep { below: 0.5, value: 0.995 },
                RampStep { below: 1.0, value: 0.99 },
                RampStep { below: 2.0, value: 0.985 },
                RampStep { below: 3.5, value: 0.97 },
            ],
            duplicate_floor: 0.96,
            cosine_exact: 0.94,
            high_combined: 0.90,
            high_combined_confidence: 0.88,
            very_similar_confidence: 0.82,
            moderate_combined: 0.80,
            moderate_combined_confidence: 0.75,
            baseline_confidence: 0.65,
            boost_saturation: 0.98,
            count_boosts: vec![
                CountBoost { min_examples: 5, boost: 0.08 },
                CountBoost { min_examples: 3, boost: 0.05 },
                CountBoost { min_examples: 2, boost: 0.03 },
            ],
            penalty_min_examples: 3,
            spread_penalties: vec![
                SpreadPenalty { above: 5.0, penalty: 0.05 },
                SpreadPenalty { above: 3.0, penalty: 0.03 },
            ],
            min_confidence: 0.55,
            max_confidence: 1.00,
            score: MemoryScoreScale::default(),
        }
    }
}

/// Which rule classified a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactDuplicate,
    CosineExact,
    HighCombined,
    VerySimilar,
    ModerateCombined,
    Weak,
}

/// A candidate label with its statistics, confidence and memory score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLabel {
    pub statistics: LabelStatistics,
    pub tier: MatchTier,
    /// Calibrated confidence in [min_confidence, max_confidence]
    pub confidence: f32,
    /// 0–100 score for arbitration against the classifier
    pub score: f32,
}

/// Label -> scored candidate
pub type ScoredCandidates = BTreeMap<String, ScoredLabel>;

/// Converts label statistics into confidences and memory scores
pub struct ConfidenceEstimator<'a> {
    policy: &'a ThresholdPolicy,
    calibration: &'a ConfidenceCalibration,
}

impl<'a> ConfidenceEstimator<'a> {
    pub fn new(policy: &'a ThresholdPolicy, calibration: &'a ConfidenceCalibration) -> Self {
        Self {
            policy,
            calibration,
        }
    }

    /// Classify a candidate; first matching tier wins
    pub fn tier(&self, label: &str, stats: &LabelStatistics) -> MatchTier {
        let cal = self.calibration;
        let cutoffs = self.policy.cutoffs_for(label);

        if self.policy.is_exact_duplicate(stats.best_euclidean) {
            MatchTier::ExactDuplicate
        } else if stats.best_cosine > self.policy.exact_cosine {
            MatchTier::CosineExact
        } else if stats.max_combined > cal.high_combined {
            MatchTier::HighCombined
        } else if stats.best_euclidean < cutoffs.euclidean && stats.best_cosine > cutoffs.cosine {
            MatchTier::VerySimilar
        } else if stats.max_combined > cal.moderate_combined {
            MatchTier::ModerateCombined
        } else {
            MatchTier::Weak
        }
    }

    /// Calibrated confidence for `label`
    pub fn estimate(&self, label: &str, stats: &LabelStatistics) -> f32 {
        self.estimate_in_tier(self.tier(label, stats), stats)
    }

    fn estimate_in_tier(&self, tier: MatchTier, stats: &LabelStatistics) -> f32 {
        let cal = self.calibration;
        let dup_cutoff = self.policy.exact_duplicate_euclidean;

        let base = match tier {
            MatchTier::ExactDuplicate => ramp(
                &cal.duplicate_ramp,
                cal.duplicate_floor,
                stats.best_euclidean,
                dup_cutoff,
            ),
            MatchTier::CosineExact => cal.cosine_exact,
            MatchTier::HighCombined => cal.high_combined_confidence,
            MatchTier::VerySimilar => cal.very_similar_confidence,
            MatchTier::ModerateCombined => cal.moderate_combined_confidence,
            MatchTier::Weak => cal.baseline_confidence,
        };

        // duplicate bases are saturated; boosting the far end of the ramp
        // would rank it above nearer duplicates
        let boost = if tier != MatchTier::ExactDuplicate && base < cal.boost_saturation {
            cal.count_boosts
                .iter()
                .filter(|b| stats.example_count >= b.min_examples)
                .map(|b| b.boost)
                .fold(0.0_f32, f32::max)
        } else {
            0.0
        };

        // true duplicates are never penalized for spread
        let penalty = if stats.example_count >= cal.penalty_min_examples
            && stats.best_euclidean >= dup_cutoff
        {
            cal.spread_penalties
                .iter()
                .filter(|p| stats.std_euclidean > p.above)
                .map(|p| p.penalty)
                .fold(0.0_f32, f32::max)
        } else {
            0.0
        };

        (base + boost - penalty).clamp(cal.min_confidence, cal.max_confidence)
    }

    /// 0–100 memory score for `label`
    pub fn memory_score(&self, label: &str, stats: &LabelStatistics) -> f32 {
        self.score_in_tier(self.tier(label, stats), label, stats)
    }

    fn score_in_tier(&self, tier: MatchTier, label: &str, stats: &LabelStatistics) -> f32 {
        let cal = self.calibration;
        let scale = &cal.score;
        let dup_cutoff = self.policy.exact_duplicate_euclidean;

        let base = match tier {
            MatchTier::ExactDuplicate => {
                let below_ramp = scale
                    .duplicate_ramp
                    .iter()
                    .find(|step| stats.best_euclidean < step.below);
                below_ramp.map_or(scale.duplicate_floor, |step| step.value)
            }
            MatchTier::CosineExact => scale.cosine_exact,
            MatchTier::HighCombined => (scale.high_combined_base
                + (stats.max_combined - cal.high_combined) * scale.high_combined_slope)
                .min(scale.high_combined_cap),
            MatchTier::VerySimilar => {
                let cutoff = self.policy.cutoffs_for(label).euclidean;
                let span = cutoff - dup_cutoff;
                let fraction = if span > 0.0 {
                    ((stats.best_euclidean - dup_cutoff) / span).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                scale.very_similar_max - fraction * (scale.very_similar_max - scale.very_similar_min)
            }
            MatchTier::ModerateCombined => {
                scale.moderate_combined_base
                    + (stats.max_combined - cal.moderate_combined) * scale.moderate_combined_slope
            }
            MatchTier::Weak => {
                scale.weak_base + (stats.max_combined - scale.weak_pivot).max(0.0) * scale.weak_slope
            }
        };

        if stats.example_count >= scale.bonus_min_examples && base < scale.bonus_ceiling {
            (base + scale.multi_example_bonus).min(100.0)
        } else {
            base
        }
    }

    /// Score every candidate in `stats`
    pub fn score_all(&self, stats: LabelStatisticsMap) -> ScoredCandidates {
        stats
            .into_iter()
            .map(|(label, statistics)| {
                let tier = self.tier(&label, &statistics);
                let confidence = self.estimate_in_tier(tier, &statistics);
                let score = self.score_in_tier(tier, &label, &statistics);
                let scored = ScoredLabel {
                    statistics,
                    tier,
                    confidence,
                    score,
                };
                (label, scored)
            })
            .collect()
    }
}

/// Step ramp, then linear interpolation from the last step's value down to
/// `floor` at `end`
fn ramp(steps: &[RampStep], floor: f32, distance: f32, end: f32) -> f32 {
    if let Some(step) = steps.iter().find(|step| distance < step.below) {
        return step.value;
    }
    let Some(last) = steps.last() else {
        return floor;
    };
    let span = end - last.below;
    if span <= 0.0 {
        return floor;
    }
    let fraction = ((distance - last.below) / span).clamp(0.0, 1.0);
    last.value - fraction * (last.value - floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ExemplarRef;
    use crate::thresholds::LabelOverride;

    fn stats(count: usize, best_e: f32, best_cos: f32, max_combined: f32) -> LabelStatistics {
        LabelStatistics {
            example_count: count,
            best_euclidean: best_e,
            best_cosine: best_cos,
            mean_euclidean: best_e,
            std_euclidean: 0.0,
            mean_combined: max_combined,
            max_combined,
            best_exemplar: ExemplarRef {
                index: 0,
                source_reference: "ref.jpg".to_string(),
            },
        }
    }

    fn estimate(s: &LabelStatistics) -> f32 {
        let policy = ThresholdPolicy::default();
        let calibration = ConfidenceCalibration::default();
        ConfidenceEstimator::new(&policy, &calibration).estimate("Pug", s)
    }

    fn score(s: &LabelStatistics) -> f32 {
        let policy = ThresholdPolicy::default();
        let calibration = ConfidenceCalibration::default();
        ConfidenceEstimator::new(&policy, &calibration).memory_score("Pug", s)
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_duplicate_ramp() {
        assert!(approx(estimate(&stats(1, 0.05, 0.99, 0.99)), 1.0));
        assert!(approx(estimate(&stats(1, 0.3, 0.99, 0.99)), 0.995));
        assert!(approx(estimate(&stats(1, 0.7, 0.99, 0.99)), 0.99));
        assert!(approx(estimate(&stats(1, 1.2, 0.9, 0.9)), 0.985));
        assert!(approx(estimate(&stats(1, 3.0, 0.9, 0.9)), 0.97));
        // halfway between 3.5 and the 5.0 cutoff
        assert!(approx(estimate(&stats(1, 4.25, 0.9, 0.9)), 0.965));
        assert!(estimate(&stats(1, 4.99, 0.9, 0.9)) >= 0.96);
    }

    #[test]
    fn test_tier_order() {
        // cosine-exact beats everything below it
        assert!(approx(estimate(&stats(1, 8.0, 0.98, 0.95)), 0.94));
        // high combined
        assert!(approx(estimate(&stats(1, 8.0, 0.95, 0.91)), 0.88));
        // very similar
        assert!(approx(estimate(&stats(1, 8.0, 0.90, 0.75)), 0.82));
        // moderate combined: too far for very-similar
        assert!(approx(estimate(&stats(1, 13.0, 0.90, 0.85)), 0.75));
        // baseline
        assert!(approx(estimate(&stats(1, 20.0, 0.5, 0.4)), 0.65));
    }

    #[test]
    fn test_multi_example_boost() {
        assert!(approx(estimate(&stats(2, 20.0, 0.5, 0.4)), 0.68));
        assert!(approx(estimate(&stats(3, 20.0, 0.5, 0.4)), 0.70));
        assert!(approx(estimate(&stats(4, 20.0, 0.5, 0.4)), 0.70));
        assert!(approx(estimate(&stats(5, 20.0, 0.5, 0.4)), 0.73));
        // duplicate bases are never boosted, even low on the ramp
        assert!(approx(estimate(&stats(6, 0.3, 0.99, 0.99)), 0.995));
        assert!(approx(estimate(&stats(6, 3.0, 0.9, 0.9)), 0.97));
        // other tiers are boosted but never exceed 1.0
        assert!(approx(estimate(&stats(6, 8.0, 0.98, 0.95)), 1.0));
    }

    #[test]
    fn test_variance_penalty() {
        let mut s = stats(3, 8.0, 0.90, 0.75);
        s.std_euclidean = 4.0;
        // 0.82 + 0.05 - 0.03
        assert!(approx(estimate(&s), 0.84));
        s.std_euclidean = 6.0;
        assert!(approx(estimate(&s), 0.82));

        // fewer than three examples: no penalty
        let mut s = stats(2, 8.0, 0.90, 0.75);
        s.std_euclidean = 6.0;
        assert!(approx(estimate(&s), 0.85));

        // exact duplicates are never penalized
        let mut s = stats(4, 3.0, 0.90, 0.90);
        s.std_euclidean = 9.0;
        assert!(approx(estimate(&s), 0.97));
    }

    #[test]
    fn test_clamped_to_floor() {
        let calibration = ConfidenceCalibration {
            baseline_confidence: 0.40,
            ..Default::default()
        };
        let policy = ThresholdPolicy::default();
        let value = ConfidenceEstimator::new(&policy, &calibration)
            .estimate("Pug", &stats(1, 20.0, 0.5, 0.4));
        assert!(approx(value, 0.55));
    }

    #[test]
    fn test_monotonic_within_duplicate_tier() {
        let mut previous = f32::MAX;
        let mut d = 0.0_f32;
        while d < 5.0 {
            let value = estimate(&stats(1, d, 0.9, 0.9));
            assert!(value <= previous, "not monotonic at {d}");
            previous = value;
            d += 0.05;
        }
    }

    #[test]
    fn test_monotonic_within_duplicate_tier_with_many_examples() {
        for count in [2, 3, 5, 8] {
            let mut previous = f32::MAX;
            let mut d = 0.0_f32;
            while d < 5.0 {
                let value = estimate(&stats(count, d, 0.9, 0.9));
                assert!(
                    value <= previous,
                    "count={count}: confidence rose from {previous} to {value} at {d}"
                );
                previous = value;
                d += 0.05;
            }
        }
    }

    #[test]
    fn test_per_label_cutoffs_change_tier() {
        let policy = ThresholdPolicy::default().with_override(
            "Samoyed",
            LabelOverride::default().with_cutoffs(7.0, 0.8),
        );
        let calibration = ConfidenceCalibration::default();
        let estimator = ConfidenceEstimator::new(&policy, &calibration);
        let s = stats(1, 8.0, 0.90, 0.75);

        assert_eq!(estimator.tier("Pug", &s), MatchTier::VerySimilar);
        assert_eq!(estimator.tier("Samoyed", &s), MatchTier::Weak);
    }

    #[test]
    fn test_memory_score_tiers() {
        assert!(approx(score(&stats(1, 0.05, 0.99, 0.99)), 100.0));
        assert!(approx(score(&stats(1, 1.2, 0.9, 0.9)), 98.5));
        assert!(approx(score(&stats(1, 4.0, 0.9, 0.9)), 97.0));
        assert!(approx(score(&stats(1, 8.0, 0.98, 0.8)), 96.0));
        assert!(approx(score(&stats(1, 8.0, 0.95, 0.95)), 91.5));
        assert!(approx(score(&stats(1, 8.0, 0.95, 1.0)), 95.0));
        // very similar: 88 at the duplicate cutoff, 80 at 12.0
        assert!(approx(score(&stats(1, 5.0, 0.9, 0.7)), 88.0));
        assert!(approx(score(&stats(1, 8.5, 0.9, 0.7)), 84.0));
        assert!(approx(score(&stats(1, 13.0, 0.9, 0.85)), 80.0));
        assert!(approx(score(&stats(1, 20.0, 0.6, 0.7)), 65.0));
        assert!(approx(score(&stats(1, 20.0, 0.3, 0.4)), 55.0));
    }

    #[test]
    fn test_memory_score_bonus() {
        // 84 + 5
        assert!(approx(score(&stats(4, 8.5, 0.9, 0.7)), 89.0));
        // 98.5 is below 99, so it is boosted but capped
        assert!(approx(score(&stats(3, 1.2, 0.9, 0.9)), 100.0));
        // 99.5 is not boosted
        assert!(approx(score(&stats(3, 0.3, 0.9, 0.9)), 99.5));
    }

    #[test]
    fn test_score_all_keeps_labels() {
        let policy = ThresholdPolicy::default();
        let calibration = ConfidenceCalibration::default();
        let estimator = ConfidenceEstimator::new(&policy, &calibration);

        let mut map = LabelStatisticsMap::new();
        map.insert("Pug".to_string(), stats(1, 1.2, 0.9, 0.9));
        map.insert("Beagle".to_string(), stats(1, 20.0, 0.3, 0.4));

        let scored = estimator.score_all(map);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored["Pug"].tier, MatchTier::ExactDuplicate);
        assert!(approx(scored["Pug"].confidence, 0.985));
        assert_eq!(scored["Beagle"].tier, MatchTier::Weak);
        assert!(approx(scored["Beagle"].score, 55.0));
    }
}
