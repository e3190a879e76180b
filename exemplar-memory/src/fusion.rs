//! Decision fusion
//!
//! Arbitrates between the classifier's prediction and scored memory
//! candidates. The arbitration is an ordered list of rules; each rule either
//! produces a verdict or defers to the next one:
//!
//! 1. no memory candidates: classifier wins
//! 2. an exact duplicate exists: memory wins unconditionally
//! 3. classifier and best memory candidate agree: boosted confidence
//! 4. very confident classifier against an ambiguous memory: classifier wins
//! 5. memory ahead by more than the margin: memory wins
//! 6. classifier ahead by more than the margin: classifier wins
//! 7. within the margin: higher confidence wins, ties to the classifier
//!
//! The margin widens for labels the threshold policy declares confusable.

use serde::{Deserialize, Serialize};

use crate::analyzer::ExemplarRef;
use crate::classifier::ClassifierOutput;
use crate::confidence::{ScoredCandidates, ScoredLabel};
use crate::thresholds::ThresholdPolicy;

/// Tunable constants of the arbitration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Classifier confidence above which it overrides ambiguous memory (default: 0.90)
    pub very_high_confidence: f32,
    /// Memory scores below this count as ambiguous for the override (default: 92)
    pub override_memory_ceiling: f32,
    /// Score margin needed to win a disagreement (default: 15)
    pub margin: f32,
    /// Score margin between confusable labels (default: 20)
    pub confusable_margin: f32,
    /// Upper bound of an agreement-boosted confidence (default: 0.98)
    pub agreement_cap: f32,
    /// Agreement boost (default: 0.05)
    pub agreement_boost: f32,
    /// Agreement boost when memory is strong (default: 0.08)
    pub strong_agreement_boost: f32,
    /// Memory score above which memory counts as strong (default: 85)
    pub strong_memory_score: f32,
    /// Alternatives kept in a decision (default: 5)
    pub max_alternatives: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            very_high_confidence: 0.90,
            override_memory_ceiling: 92.0,
            margin: 15.0,
            confusable_margin: 20.0,
            agreement_cap: 0.98,
            agreement_boost: 0.05,
            strong_agreement_boost: 0.08,
            strong_memory_score: 85.0,
            max_alternatives: 5,
        }
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    NoMemoryMatch,
    MemoryExactDuplicate,
    AgreementBoost,
    ModelOverrideHighConfidence,
    MemoryMarginWin,
    ModelMarginWin,
    MemoryCloseCall,
    ModelCloseCall,
}

impl RationaleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMemoryMatch => "no_memory_match",
            Self::MemoryExactDuplicate => "memory_exact_duplicate",
            Self::AgreementBoost => "agreement_boost",
            Self::ModelOverrideHighConfidence => "model_override_high_confidence",
            Self::MemoryMarginWin => "memory_margin_win",
            Self::ModelMarginWin => "model_margin_win",
            Self::MemoryCloseCall => "memory_close_call",
            Self::ModelCloseCall => "model_close_call",
        }
    }
}

impl std::fmt::Display for RationaleTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an alternative label came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeSource {
    Classifier,
    Memory,
}

/// A label the decision did not pick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    pub label: String,
    pub confidence: f32,
    pub source: AlternativeSource,
}

/// The memory candidate the arbitration weighed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEvidence {
    pub label: String,
    pub confidence: f32,
    pub score: f32,
    pub example_count: usize,
    pub best_euclidean: f32,
    pub best_cosine: f32,
    pub best_exemplar: ExemplarRef,
}

impl MemoryEvidence {
    fn from_candidate(label: &str, candidate: &ScoredLabel) -> Self {
        Self {
            label: label.to_string(),
            confidence: candidate.confidence,
            score: candidate.score,
            example_count: candidate.statistics.example_count,
            best_euclidean: candidate.statistics.best_euclidean,
            best_cosine: candidate.statistics.best_cosine,
            best_exemplar: candidate.statistics.best_exemplar.clone(),
        }
    }
}

/// Final, auditable answer for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    final_label: String,
    final_confidence: f32,
    used_memory: bool,
    agreement: Option<bool>,
    rationale_tag: RationaleTag,
    top_alternatives: Vec<Alternative>,
    classifier_label: String,
    classifier_confidence: f32,
    memory_evidence: Option<MemoryEvidence>,
}

impl Decision {
    pub fn final_label(&self) -> &str {
        &self.final_label
    }

    pub fn final_confidence(&self) -> f32 {
        self.final_confidence
    }

    pub fn used_memory(&self) -> bool {
        self.used_memory
    }

    pub fn agreement(&self) -> Option<bool> {
        self.agreement
    }

    pub fn rationale_tag(&self) -> RationaleTag {
        self.rationale_tag
    }

    pub fn top_alternatives(&self) -> &[Alternative] {
        &self.top_alternatives
    }

    pub fn classifier_label(&self) -> &str {
        &self.classifier_label
    }

    pub fn classifier_confidence(&self) -> f32 {
        self.classifier_confidence
    }

    pub fn memory_evidence(&self) -> Option<&MemoryEvidence> {
        self.memory_evidence.as_ref()
    }
}

/// Outcome of a single rule
#[derive(Debug, Clone, PartialEq)]
struct Verdict<'a> {
    label: &'a str,
    confidence: f32,
    used_memory: bool,
    agreement: Option<bool>,
    rationale: RationaleTag,
    /// Memory candidate behind the verdict, if any
    evidence: Option<(&'a str, &'a ScoredLabel)>,
}

/// Everything a rule may look at
struct FusionContext<'a> {
    classifier: &'a ClassifierOutput,
    candidates: &'a ScoredCandidates,
    best: Option<(&'a str, &'a ScoredLabel)>,
    policy: &'a ThresholdPolicy,
    config: &'a FusionConfig,
}

impl<'a> FusionContext<'a> {
    fn new(
        classifier: &'a ClassifierOutput,
        candidates: &'a ScoredCandidates,
        policy: &'a ThresholdPolicy,
        config: &'a FusionConfig,
    ) -> Self {
        Self {
            classifier,
            candidates,
            best: best_candidate(candidates),
            policy,
            config,
        }
    }

    fn classifier_label(&self) -> &'a str {
        &self.classifier.top().label
    }

    fn classifier_confidence(&self) -> f32 {
        self.classifier.top().confidence
    }

    fn classifier_score(&self) -> f32 {
        self.classifier_confidence() * 100.0
    }

    /// Best memory candidate when it names a different label than the classifier
    fn disagreement(&self) -> Option<(&'a str, &'a ScoredLabel)> {
        self.best
            .filter(|(label, _)| *label != self.classifier_label())
    }

    fn margin_required(&self, memory_label: &str) -> f32 {
        if self.policy.is_confusable(self.classifier_label(), memory_label) {
            self.config.confusable_margin
        } else {
            self.config.margin
        }
    }

    fn classifier_wins(
        &self,
        rationale: RationaleTag,
        evidence: Option<(&'a str, &'a ScoredLabel)>,
    ) -> Verdict<'a> {
        Verdict {
            label: self.classifier_label(),
            confidence: self.classifier_confidence(),
            used_memory: false,
            agreement: evidence.map(|(label, _)| label == self.classifier_label()),
            rationale,
            evidence,
        }
    }

    fn memory_wins(&self, rationale: RationaleTag, label: &'a str, candidate: &'a ScoredLabel) -> Verdict<'a> {
        Verdict {
            label,
            confidence: candidate.confidence,
            used_memory: true,
            agreement: Some(label == self.classifier_label()),
            rationale,
            evidence: Some((label, candidate)),
        }
    }
}

/// Highest score, then higher confidence, then smaller distance, then label order
fn best_candidate(candidates: &ScoredCandidates) -> Option<(&str, &ScoredLabel)> {
    let mut best: Option<(&str, &ScoredLabel)> = None;
    for (label, candidate) in candidates {
        let better = match best {
            None => true,
            Some((_, current)) => {
                candidate.score > current.score
                    || (candidate.score == current.score
                        && (candidate.confidence > current.confidence
                            || (candidate.confidence == current.confidence
                                && candidate.statistics.best_euclidean
                                    < current.statistics.best_euclidean)))
            }
        };
        if better {
            best = Some((label.as_str(), candidate));
        }
    }
    best
}

type Rule = for<'a> fn(&FusionContext<'a>) -> Option<Verdict<'a>>;

const RULES: [Rule; 7] = [
    no_memory_match,
    exact_duplicate,
    agreement,
    high_confidence_override,
    memory_margin,
    model_margin,
    close_call,
];

fn no_memory_match<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    ctx.candidates
        .is_empty()
        .then(|| ctx.classifier_wins(RationaleTag::NoMemoryMatch, None))
}

/// Exactness overrides every other signal, including classifier confidence
fn exact_duplicate<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let mut nearest: Option<(&'a str, &'a ScoredLabel)> = None;
    for (label, candidate) in ctx.candidates {
        let distance = candidate.statistics.best_euclidean;
        if !ctx.policy.is_exact_duplicate(distance) {
            continue;
        }
        if nearest.map_or(true, |(_, n)| distance < n.statistics.best_euclidean) {
            nearest = Some((label.as_str(), candidate));
        }
    }
    let (label, candidate) = nearest?;
    Some(ctx.memory_wins(RationaleTag::MemoryExactDuplicate, label, candidate))
}

fn agreement<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let (label, candidate) = ctx.best?;
    if label != ctx.classifier_label() {
        return None;
    }

    let cfg = ctx.config;
    let boost = if candidate.score > cfg.strong_memory_score {
        cfg.strong_agreement_boost
    } else {
        cfg.agreement_boost
    };
    let confidence =
        (ctx.classifier_confidence().max(candidate.confidence) + boost).min(cfg.agreement_cap);

    Some(Verdict {
        label,
        confidence,
        used_memory: true,
        agreement: Some(true),
        rationale: RationaleTag::AgreementBoost,
        evidence: Some((label, candidate)),
    })
}

/// A confident classifier outranks an ambiguous memory, confusable or not
fn high_confidence_override<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let best = ctx.disagreement()?;
    let confident = ctx.classifier_confidence() > ctx.config.very_high_confidence;
    let ambiguous = best.1.score < ctx.config.override_memory_ceiling;
    (confident && ambiguous)
        .then(|| ctx.classifier_wins(RationaleTag::ModelOverrideHighConfidence, Some(best)))
}

fn memory_margin<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let (label, candidate) = ctx.disagreement()?;
    (candidate.score - ctx.classifier_score() > ctx.margin_required(label))
        .then(|| ctx.memory_wins(RationaleTag::MemoryMarginWin, label, candidate))
}

fn model_margin<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let best = ctx.disagreement()?;
    (ctx.classifier_score() - best.1.score > ctx.margin_required(best.0))
        .then(|| ctx.classifier_wins(RationaleTag::ModelMarginWin, Some(best)))
}

fn close_call<'a>(ctx: &FusionContext<'a>) -> Option<Verdict<'a>> {
    let (label, candidate) = ctx.disagreement()?;
    if candidate.confidence > ctx.classifier_confidence() {
        Some(ctx.memory_wins(RationaleTag::MemoryCloseCall, label, candidate))
    } else {
        Some(ctx.classifier_wins(RationaleTag::ModelCloseCall, Some((label, candidate))))
    }
}

/// Runs the arbitration rules
pub struct DecisionFusion<'a> {
    policy: &'a ThresholdPolicy,
    config: &'a FusionConfig,
}

impl<'a> DecisionFusion<'a> {
    pub fn new(policy: &'a ThresholdPolicy, config: &'a FusionConfig) -> Self {
        Self { policy, config }
    }

    /// Pure function of (classifier output, scored candidates)
    pub fn decide(&self, classifier: &ClassifierOutput, candidates: &ScoredCandidates) -> Decision {
        let ctx = FusionContext::new(classifier, candidates, self.policy, self.config);
        let verdict = RULES
            .iter()
            .find_map(|rule| rule(&ctx))
            .unwrap_or_else(|| ctx.classifier_wins(RationaleTag::ModelCloseCall, ctx.best));

        log::debug!(
            "Decision: {} ({:.3}) via {} [classifier {} {:.3}, {} memory candidates]",
            verdict.label,
            verdict.confidence,
            verdict.rationale,
            ctx.classifier_label(),
            ctx.classifier_confidence(),
            candidates.len()
        );

        Decision {
            final_label: verdict.label.to_string(),
            final_confidence: verdict.confidence.clamp(0.0, 1.0),
            used_memory: verdict.used_memory,
            agreement: verdict.agreement,
            rationale_tag: verdict.rationale,
            top_alternatives: self.alternatives(classifier, candidates, verdict.label),
            classifier_label: ctx.classifier_label().to_string(),
            classifier_confidence: ctx.classifier_confidence(),
            memory_evidence: verdict
                .evidence
                .map(|(label, candidate)| MemoryEvidence::from_candidate(label, candidate)),
        }
    }

    /// Memory candidates and classifier top-K, minus the final label, one
    /// entry per label, highest confidence first
    fn alternatives(
        &self,
        classifier: &ClassifierOutput,
        candidates: &ScoredCandidates,
        final_label: &str,
    ) -> Vec<Alternative> {
        let memory = candidates.iter().map(|(label, c)| Alternative {
            label: label.clone(),
            confidence: c.confidence,
            source: AlternativeSource::Memory,
        });
        let model = classifier.top_k().iter().map(|s| Alternative {
            label: s.label.clone(),
            confidence: s.confidence,
            source: AlternativeSource::Classifier,
        });

        let mut merged: Vec<Alternative> = Vec::new();
        for alt in memory.chain(model) {
            if alt.label == final_label {
                continue;
            }
            match merged.iter_mut().find(|m| m.label == alt.label) {
                Some(existing) if alt.confidence > existing.confidence => *existing = alt,
                Some(_) => {}
                None => merged.push(alt),
            }
        }

        merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        merged.truncate(self.config.max_alternatives);
        merged
    }
}
