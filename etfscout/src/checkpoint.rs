//! Durable batch checkpoints
//!
//! One JSON snapshot per committed batch, written to a temporary path
//! and atomically renamed into place. A crash mid-write leaves a stale
//! `.tmp` file behind and the previous checkpoint untouched, so the
//! highest parseable snapshot is always a valid resume point.
//! Checkpoints are append-only and never mutated after commit.
//!
//! The run manifest fingerprints the identifier list a run was started
//! with, along with its chunking parameters. Resuming against a
//! different list or batch size is refused instead of silently producing
//! a half-matching output.

use crate::model::ScoredRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use tracing::{debug, info, warn};

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const CHECKPOINT_SUFFIX: &str = ".json";
const MANIFEST_FILE: &str = "run_manifest.json";

/// Persistence failures are fatal to the run but never destructive:
/// prior checkpoints are left exactly as they were.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint at {path}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error(
        "run does not match the manifest of the run being resumed \
         ({field}: expected {expected}, got {actual})"
    )]
    ManifestMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
}

/// One committed batch snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Zero-based batch index, strictly increasing across a run
    pub batch_index: u32,
    /// Records for this batch, in input order
    pub records: Vec<ScoredRecord>,
    pub committed_at: DateTime<Utc>,
    /// Written true at commit; a snapshot without it is not trusted
    pub complete: bool,
}

/// Identity of a run, stored alongside its checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Identity of the run that created this state directory
    pub run_id: Uuid,
    /// Fingerprint of the ordered identifier list
    pub fingerprint: String,
    pub identifier_count: usize,
    pub batch_size: usize,
    pub started_at: DateTime<Utc>,
}

/// File-backed checkpoint store for one run directory
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) the store at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::WriteFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, batch_index: u32) -> PathBuf {
        self.dir
            .join(format!("{}{:05}{}", CHECKPOINT_PREFIX, batch_index, CHECKPOINT_SUFFIX))
    }

    /// Write `payload` to a temp file then atomically rename into place
    fn publish(&self, path: &Path, payload: &[u8]) -> Result<(), PersistenceError> {
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            fs::write(&tmp, payload)?;
            fs::rename(&tmp, path)
        };
        write().map_err(|source| PersistenceError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Ensure the on-disk manifest matches this run's identity
    ///
    /// A fresh directory gets the manifest written. An existing manifest
    /// must match on fingerprint, identifier count and batch size: a
    /// changed batch size re-chunks the list, so a committed batch index
    /// would no longer name the same identifiers and resuming past it
    /// would drop items.
    pub fn verify_or_write_manifest(
        &self,
        manifest: &RunManifest,
    ) -> Result<(), PersistenceError> {
        let path = self.dir.join(MANIFEST_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| {
                PersistenceError::WriteFailed {
                    path: path.clone(),
                    source,
                }
            })?;
            let existing: RunManifest = serde_json::from_str(&raw).map_err(|e| {
                PersistenceError::CorruptCheckpoint {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            if existing.fingerprint != manifest.fingerprint {
                return Err(PersistenceError::ManifestMismatch {
                    field: "identifier list fingerprint",
                    expected: existing.fingerprint,
                    actual: manifest.fingerprint.clone(),
                });
            }
            if existing.identifier_count != manifest.identifier_count {
                return Err(PersistenceError::ManifestMismatch {
                    field: "identifier count",
                    expected: existing.identifier_count.to_string(),
                    actual: manifest.identifier_count.to_string(),
                });
            }
            if existing.batch_size != manifest.batch_size {
                return Err(PersistenceError::ManifestMismatch {
                    field: "batch size",
                    expected: existing.batch_size.to_string(),
                    actual: manifest.batch_size.to_string(),
                });
            }
            debug!("Run manifest verified");
            return Ok(());
        }

        let payload = serde_json::to_vec_pretty(manifest).map_err(|e| {
            PersistenceError::CorruptCheckpoint {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        self.publish(&path, &payload)?;
        info!(fingerprint = %manifest.fingerprint, "Run manifest written");
        Ok(())
    }

    /// Commit one batch as an atomically-published checkpoint
    pub fn commit(
        &self,
        batch_index: u32,
        records: Vec<ScoredRecord>,
    ) -> Result<(), PersistenceError> {
        let path = self.checkpoint_path(batch_index);
        let checkpoint = Checkpoint {
            batch_index,
            records,
            committed_at: Utc::now(),
            complete: true,
        };
        let payload = serde_json::to_vec_pretty(&checkpoint).map_err(|e| {
            PersistenceError::CorruptCheckpoint {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        self.publish(&path, &payload)?;
        info!(
            batch_index,
            records = checkpoint.records.len(),
            "Checkpoint committed"
        );
        Ok(())
    }

    /// Indices of committed checkpoints, sorted ascending
    fn committed_indices(&self) -> Result<Vec<u32>, PersistenceError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| {
            PersistenceError::WriteFailed {
                path: self.dir.clone(),
                source,
            }
        })?;

        let mut indices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_prefix(CHECKPOINT_PREFIX)
                .and_then(|s| s.strip_suffix(CHECKPOINT_SUFFIX))
            else {
                continue;
            };
            if let Ok(index) = stem.parse::<u32>() {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Highest fully-committed batch index, if any
    ///
    /// A checkpoint that exists but fails to parse, or that was written
    /// without the completion flag, is reported as corrupt rather than
    /// skipped: resuming past it would silently lose its batch.
    pub fn resume(&self) -> Result<Option<u32>, PersistenceError> {
        let indices = self.committed_indices()?;
        let mut highest = None;
        for index in indices {
            self.load(index)?;
            highest = Some(index);
        }
        if let Some(index) = highest {
            info!(last_committed = index, "Resume point found");
        }
        Ok(highest)
    }

    /// Load and verify one committed checkpoint
    pub fn load(&self, batch_index: u32) -> Result<Checkpoint, PersistenceError> {
        let path = self.checkpoint_path(batch_index);
        let raw = fs::read_to_string(&path).map_err(|source| {
            PersistenceError::WriteFailed {
                path: path.clone(),
                source,
            }
        })?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::CorruptCheckpoint {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if !checkpoint.complete {
            return Err(PersistenceError::CorruptCheckpoint {
                path,
                reason: "completion flag not set".to_string(),
            });
        }
        if checkpoint.batch_index != batch_index {
            return Err(PersistenceError::CorruptCheckpoint {
                path,
                reason: format!(
                    "index mismatch: file named {} contains batch {}",
                    batch_index, checkpoint.batch_index
                ),
            });
        }
        Ok(checkpoint)
    }

    /// Concatenate all committed checkpoints into one record list, in
    /// batch order
    pub fn load_all(&self) -> Result<Vec<ScoredRecord>, PersistenceError> {
        let mut records = Vec::new();
        for index in self.committed_indices()? {
            let checkpoint = self.load(index)?;
            records.extend(checkpoint.records);
        }
        if records.is_empty() {
            warn!(dir = %self.dir.display(), "No committed checkpoints found");
        }
        Ok(records)
    }
}
