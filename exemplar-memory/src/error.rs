//! Error types for exemplar-memory

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the exemplar memory
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Two embeddings of different length were compared
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted store failed to parse or violates record invariants
    #[error("Store corrupt at {}: {reason}", path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    /// Persistence layer could not durably commit a mutation
    #[error("Store unwritable at {}: {source}", path.display())]
    StoreUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Insertion attempted with an empty label
    #[error("Exemplar label must not be empty")]
    EmptyLabel,

    /// Classifier output breaks the collaborator contract
    #[error("Invalid prediction: {0}")]
    InvalidPrediction(String),

    /// Configuration failed to parse or is inconsistent
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a store corrupt error
    pub fn store_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a store unwritable error
    pub fn store_unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreUnwritable {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid prediction error
    pub fn invalid_prediction(msg: impl Into<String>) -> Self {
        Self::InvalidPrediction(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the error is the caller's fault and should not be retried
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::EmptyLabel | Self::InvalidPrediction(_)
        )
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
