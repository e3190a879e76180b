//! Engine configuration and path discovery
//!
//! Every tunable lives in a plain struct with documented defaults. A JSON
//! file may override any subset of fields; missing fields keep their
//! defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceCalibration;
use crate::error::{MemoryError, Result};
use crate::fusion::FusionConfig;
use crate::similarity::SimilarityWeights;
use crate::thresholds::ThresholdPolicy;

/// Environment variable naming the store file
pub const STORE_PATH_ENV: &str = "EXEMPLAR_MEMORY_STORE";

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "EXEMPLAR_MEMORY_CONFIG";

/// Conventional store location relative to the working directory
pub const DEFAULT_STORE_PATH: &str = "storage/app/references.json";

/// All tunables of the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: ThresholdPolicy,
    pub similarity: SimilarityWeights,
    pub calibration: ConfidenceCalibration,
    pub fusion: FusionConfig,
}

impl EngineConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::invalid_config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        let w = &self.similarity;
        for (name, value) in [
            ("euclidean_weight", w.euclidean_weight),
            ("cosine_weight", w.cosine_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MemoryError::invalid_config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(w.euclidean_scale.is_finite() && w.euclidean_scale > 0.0) {
            return Err(MemoryError::invalid_config(format!(
                "euclidean_scale must be positive, got {}",
                w.euclidean_scale
            )));
        }

        let c = &self.calibration;
        if !(0.0..=1.0).contains(&c.min_confidence)
            || !(0.0..=1.0).contains(&c.max_confidence)
            || c.min_confidence > c.max_confidence
        {
            return Err(MemoryError::invalid_config(format!(
                "confidence clamp [{}, {}] must be an ordered range within [0, 1]",
                c.min_confidence, c.max_confidence
            )));
        }

        let f = &self.fusion;
        for (name, value) in [
            ("very_high_confidence", f.very_high_confidence),
            ("agreement_cap", f.agreement_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::invalid_config(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        for (name, value) in [
            ("margin", f.margin),
            ("confusable_margin", f.confusable_margin),
            ("agreement_boost", f.agreement_boost),
            ("strong_agreement_boost", f.strong_agreement_boost),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MemoryError::invalid_config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Find the store file with priority:
/// 1. Explicit path from the caller
/// 2. EXEMPLAR_MEMORY_STORE environment variable
/// 3. `storage/app/references.json`
pub fn resolve_store_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        log::info!("Using store path: {}", path.display());
        return path.to_path_buf();
    }

    if let Some(path) = std::env::var_os(STORE_PATH_ENV) {
        let path = PathBuf::from(path);
        log::info!("Using {}: {}", STORE_PATH_ENV, path.display());
        return path;
    }

    log::info!("Using default store path: {}", DEFAULT_STORE_PATH);
    PathBuf::from(DEFAULT_STORE_PATH)
}

/// Load configuration with priority:
/// 1. Explicit file from the caller
/// 2. EXEMPLAR_MEMORY_CONFIG environment variable
/// 3. Built-in defaults
pub fn resolve_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        log::info!("Using config file: {}", path.display());
        return EngineConfig::from_json_file(path);
    }

    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        log::info!("Using {}: {}", CONFIG_PATH_ENV, path.display());
        return EngineConfig::from_json_file(&path);
    }

    log::info!("Using default engine config");
    Ok(EngineConfig::default())
}
