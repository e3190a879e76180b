//! Exemplar Memory
//!
//! Human-correctable memory that sits next to a static image classifier.
//! Corrections are stored as (embedding, label) exemplars; every later
//! prediction is arbitrated against them.
//!
//! ## Features
//!
//! - **Multi-metric similarity** - euclidean distance and cosine blended into one score
//! - **Calibrated memory confidence** - tiered by match quality, adjusted for evidence volume and spread
//! - **Auditable fusion** - every decision carries a rationale tag and its alternatives
//! - **Deduplicating corrections** - repeated corrections skip, conflicting ones relabel
//! - **Atomic persistence** - a JSON store replaced via write-then-rename under a single writer
//!
//! ## Example
//!
//! ```ignore
//! use exemplar_memory::{ClassifierOutput, EngineConfig, ExemplarEngine, LabelScore};
//!
//! let engine = ExemplarEngine::open(EngineConfig::default(), "storage/app/references.json")?;
//!
//! // A person says this image is a Basset Hound
//! engine.learn(embedding.clone(), "Basset Hound", "IMG_0042.jpg")?;
//!
//! // The classifier disagrees on the same image; memory wins
//! let prediction = ClassifierOutput::new(embedding, vec![LabelScore::new("Beagle", 0.40)])?;
//! let decision = engine.decide(&prediction)?;
//! assert_eq!(decision.final_label(), "Basset Hound");
//! ```

pub mod analyzer;
pub mod classifier;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod exemplar;
pub mod fusion;
pub mod insertion;
pub mod similarity;
pub mod store;
pub mod thresholds;

// Re-exports for convenience
pub use analyzer::{ExemplarRef, LabelStatistics, MemoryAnalyzer};
pub use classifier::{display_name, ClassifierOutput, LabelScore};
pub use confidence::{ConfidenceCalibration, ConfidenceEstimator, MatchTier, ScoredLabel};
pub use config::{resolve_config, resolve_store_path, EngineConfig};
pub use engine::ExemplarEngine;
pub use error::{MemoryError, Result};
pub use exemplar::{Exemplar, ExemplarBuilder};
pub use fusion::{
    Alternative, AlternativeSource, Decision, DecisionFusion, FusionConfig, MemoryEvidence,
    RationaleTag,
};
pub use insertion::{CorrectionOutcome, CorrectionStatus, InsertionPolicy};
pub use similarity::{Similarity, SimilarityEngine, SimilarityWeights};
pub use store::{MemoryStore, Snapshot};
pub use thresholds::{LabelOverride, ThresholdPolicy};
