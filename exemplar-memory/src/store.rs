//! Persistent exemplar store
//!
//! Exemplars live in memory as an immutable snapshot behind a `RwLock` and on
//! disk as a single JSON array. Every mutation runs under the writer mutex,
//! writes the new array to a sibling `.tmp` file, fsyncs it, renames it
//! over the store file and fsyncs the directory; only then is the in-memory
//! snapshot swapped. A failed
//! commit leaves both copies at the previous version.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{MemoryError, Result};
use crate::exemplar::Exemplar;

/// A consistent, read-only view of the store at one version
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    exemplars: Arc<Vec<Exemplar>>,
    version: u64,
}

impl Snapshot {
    pub fn exemplars(&self) -> &[Exemplar] {
        &self.exemplars
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    /// Dimensionality established by the first exemplar
    pub fn dimension(&self) -> Option<usize> {
        self.exemplars.first().map(Exemplar::dimension)
    }
}

/// Insertion-ordered exemplar memory with atomic persistence
pub struct MemoryStore {
    path: Option<PathBuf>,
    current: RwLock<Snapshot>,
    writer: Mutex<()>,
}

impl MemoryStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exemplars = load_exemplars(&path)?;

        log::info!(
            "MemoryStore opened at: {} ({} exemplars, dimension {})",
            path.display(),
            exemplars.len(),
            exemplars
                .first()
                .map(|e| e.dimension().to_string())
                .unwrap_or_else(|| "unset".to_string())
        );

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Snapshot {
                exemplars: Arc::new(exemplars),
                version: 0,
            }),
            writer: Mutex::new(()),
        })
    }

    /// Empty store that is never persisted
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(Snapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Non-persisted store seeded with `exemplars`
    pub fn from_exemplars(exemplars: Vec<Exemplar>) -> Result<Self> {
        validate_records(&exemplars)
            .map_err(|e| MemoryError::store_corrupt("<memory>", e.to_string()))?;
        Ok(Self {
            path: None,
            current: RwLock::new(Snapshot {
                exemplars: Arc::new(exemplars),
                version: 0,
            }),
            writer: Mutex::new(()),
        })
    }

    /// Backing file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current snapshot; never blocks on a commit in progress for longer than a pointer swap
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.current.read().dimension()
    }

    /// Incremented on every committed mutation
    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Distinct labels in first-seen order
    pub fn labels(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut seen = Vec::new();
        for exemplar in snapshot.exemplars() {
            if !seen.iter().any(|l: &String| l == &exemplar.label) {
                seen.push(exemplar.label.clone());
            }
        }
        seen
    }

    /// Read-modify-write under the single-writer lock
    ///
    /// `mutate` works on a private copy and reports whether it changed
    /// anything. Unchanged copies are dropped without touching disk.
    pub(crate) fn update<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<Exemplar>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _guard = self.writer.lock();

        let base = self.snapshot();
        let mut next = base.exemplars().to_vec();
        let (value, changed) = mutate(&mut next)?;
        if !changed {
            return Ok(value);
        }

        validate_records(&next).map_err(RecordError::into_caller_error)?;

        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &next) {
                log::warn!("Failed to commit store {}: {}", path.display(), e);
                return Err(MemoryError::store_unwritable(path, e));
            }
        }

        *self.current.write() = Snapshot {
            exemplars: Arc::new(next),
            version: base.version + 1,
        };
        Ok(value)
    }

    /// Get store statistics
    pub fn stats(&self) -> serde_json::Value {
        let snapshot = self.snapshot();

        let mut by_label: HashMap<String, usize> = HashMap::new();
        let mut updated = 0;
        for exemplar in snapshot.exemplars() {
            *by_label.entry(exemplar.label.clone()).or_insert(0) += 1;
            if exemplar.was_relabeled() {
                updated += 1;
            }
        }

        serde_json::json!({
            "totalExemplars": snapshot.len(),
            "dimension": snapshot.dimension(),
            "byLabel": by_label,
            "updatedExemplars": updated,
            "version": snapshot.version(),
        })
    }
}

fn load_exemplars(path: &Path) -> Result<Vec<Exemplar>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No store at {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let exemplars: Vec<Exemplar> = serde_json::from_slice(&bytes)
        .map_err(|e| MemoryError::store_corrupt(path, e.to_string()))?;
    validate_records(&exemplars).map_err(|e| MemoryError::store_corrupt(path, e.to_string()))?;
    Ok(exemplars)
}

/// Record-level invariant violations
#[derive(Debug, thiserror::Error)]
enum RecordError {
    #[error("record {0} has an empty embedding")]
    EmptyEmbedding(usize),
    #[error("record {0} has an empty label")]
    EmptyLabel(usize),
    #[error("record {0} has a non-finite embedding component")]
    NonFinite(usize),
    #[error("record {index} has dimension {actual}, expected {expected}")]
    Dimension {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

impl RecordError {
    fn into_caller_error(self) -> MemoryError {
        match self {
            Self::EmptyEmbedding(_) => MemoryError::invalid_prediction("embedding must not be empty"),
            Self::EmptyLabel(_) => MemoryError::EmptyLabel,
            Self::NonFinite(_) => {
                MemoryError::invalid_prediction("embedding components must be finite")
            }
            Self::Dimension {
                expected, actual, ..
            } => MemoryError::dimension_mismatch(expected, actual),
        }
    }
}

/// Every record has a label and all embeddings are finite and share one
/// non-zero length
fn validate_records(exemplars: &[Exemplar]) -> std::result::Result<(), RecordError> {
    let Some(first) = exemplars.first() else {
        return Ok(());
    };
    let expected = first.dimension();

    for (index, exemplar) in exemplars.iter().enumerate() {
        if exemplar.embedding.is_empty() {
            return Err(RecordError::EmptyEmbedding(index));
        }
        if exemplar.label.trim().is_empty() {
            return Err(RecordError::EmptyLabel(index));
        }
        if exemplar.embedding.iter().any(|v| !v.is_finite()) {
            return Err(RecordError::NonFinite(index));
        }
        if exemplar.dimension() != expected {
            return Err(RecordError::Dimension {
                index,
                expected,
                actual: exemplar.dimension(),
            });
        }
    }
    Ok(())
}

/// Write to `<path>.tmp`, fsync, rename over `path`, then fsync the directory
fn persist(path: &Path, exemplars: &[Exemplar]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let bytes = serde_json::to_vec_pretty(exemplars)?;
    let result = write_and_rename(&tmp_path, path, &bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)?;
    sync_parent_dir(path)
}

/// Make the rename itself durable
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
