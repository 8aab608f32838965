//! Checkpoint store
//!
//! Durable record of pagination progress for a resumable dataset. Loads fail
//! soft: a missing, unreadable or corrupt checkpoint degrades to a cold start
//! and is never fatal. Saves go through a temp file and rename so a crash can
//! never leave a torn checkpoint behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::FetchError;

const CHECKPOINT_VERSION: u32 = 1;

/// Pagination progress for one dataset, persisted as pretty JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Dataset slug this checkpoint belongs to.
    pub dataset: String,
    /// Next offset to fetch from.
    pub offset: u64,
    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
    /// Format version.
    pub version: u32,
}

/// Filesystem-backed store of per-dataset checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, dataset: &str) -> PathBuf {
        let sanitized = dataset.replace(['/', ':'], "_");
        self.dir.join(format!("{sanitized}.checkpoint.json"))
    }

    /// Load the checkpoint for a dataset.
    ///
    /// Returns `None` when absent, and also when unreadable or corrupt,
    /// after logging, so an interrupted run can always restart from zero.
    pub fn load(&self, dataset: &str) -> Option<Checkpoint> {
        let path = self.path(dataset);
        if !path.exists() {
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Unreadable checkpoint {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("Corrupt checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Atomically persist the offset for a dataset.
    pub fn save(&self, dataset: &str, offset: u64) -> Result<(), FetchError> {
        let checkpoint = Checkpoint {
            dataset: dataset.to_string(),
            offset,
            updated_at: Utc::now(),
            version: CHECKPOINT_VERSION,
        };
        let encoded = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| FetchError::Checkpoint(e.to_string()))?;

        let path = self.path(dataset);
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;
        fs::rename(temp_path, path)?;
        Ok(())
    }

    /// Remove the checkpoint for a dataset; absent is a no-op.
    pub fn clear(&self, dataset: &str) -> Result<(), FetchError> {
        match fs::remove_file(self.path(dataset)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a checkpoint file exists for a dataset.
    pub fn exists(&self, dataset: &str) -> bool {
        self.path(dataset).exists()
    }
}
