//! Exemplar engine
//!
//! High-level API tying the decision path and the correction path to one
//! store and one configuration.

use std::path::Path;
use std::sync::Arc;

use crate::analyzer::MemoryAnalyzer;
use crate::classifier::ClassifierOutput;
use crate::confidence::ConfidenceEstimator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fusion::{Decision, DecisionFusion};
use crate::insertion::{CorrectionOutcome, InsertionPolicy};
use crate::similarity::SimilarityEngine;
use crate::store::MemoryStore;

/// Decision and correction entry point
///
/// Cheap to clone; clones share the store. Decisions run in parallel on
/// snapshots while corrections are serialized by the store's writer lock.
#[derive(Clone)]
pub struct ExemplarEngine {
    config: Arc<EngineConfig>,
    similarity: SimilarityEngine,
    store: Arc<MemoryStore>,
}

impl ExemplarEngine {
    /// Create an engine over an existing store
    pub fn new(config: EngineConfig, store: Arc<MemoryStore>) -> Result<Self> {
        config.validate()?;
        let similarity = SimilarityEngine::new(config.similarity.clone());

        log::info!(
            "ExemplarEngine ready ({} exemplars, {} dimensions)",
            store.len(),
            store
                .dimension()
                .map_or_else(|| "unknown".to_string(), |d| d.to_string())
        );

        Ok(Self {
            config: Arc::new(config),
            similarity,
            store,
        })
    }

    /// Open the store file at `path` and create an engine over it
    pub fn open(config: EngineConfig, path: impl AsRef<Path>) -> Result<Self> {
        let store = MemoryStore::open(path)?;
        Self::new(config, Arc::new(store))
    }

    /// Arbitrate between the classifier and memory for one query
    pub fn decide(&self, prediction: &ClassifierOutput) -> Result<Decision> {
        let snapshot = self.store.snapshot();
        let policy = &self.config.thresholds;

        let statistics = MemoryAnalyzer::new(policy, &self.similarity)
            .analyze(prediction.embedding(), snapshot.exemplars())?;
        let candidates =
            ConfidenceEstimator::new(policy, &self.config.calibration).score_all(statistics);

        Ok(DecisionFusion::new(policy, &self.config.fusion).decide(prediction, &candidates))
    }

    /// Record a human correction
    pub fn learn(
        &self,
        embedding: Vec<f32>,
        label: &str,
        source_reference: &str,
    ) -> Result<CorrectionOutcome> {
        let insertion = InsertionPolicy::new(&self.config.thresholds);
        self.store
            .update(|exemplars| insertion.apply(exemplars, embedding, label, source_reference))
    }

    /// Store statistics
    pub fn stats(&self) -> serde_json::Value {
        self.store.stats()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
