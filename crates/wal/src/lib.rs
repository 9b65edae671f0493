//! Durable write-ahead log for CFT-Log hard state.
//!
//! Every save rewrites the full serialized [`HardState`] to a sibling temp
//! file, fsyncs it, then renames it over the target. After a crash at any
//! point, [`Wal::load`] observes either the pre-save or the post-save
//! state, never a torn mix.
//!
//! The payload is self-describing JSON keyed per node id, so several nodes
//! can share one data directory. Cross-implementation byte compatibility
//! is a non-goal; the atomicity contract is the point.

use consort_types::HardState;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from WAL persistence.
///
/// An [`WalError::Io`] during save is fatal to protocol participation: the
/// caller must not send protocol messages whose correctness depends on the
/// unsaved change. [`WalError::Corrupt`] on load must surface, never be
/// papered over with a fresh state.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL payload corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Write-ahead log bound to one node id.
#[derive(Debug, Clone)]
pub struct Wal {
    path: PathBuf,
    temp_path: PathBuf,
}

impl Wal {
    /// Bind a WAL inside `data_dir` for `node_id`, creating the directory
    /// if needed.
    pub fn open(data_dir: impl AsRef<Path>, node_id: u64) -> Result<Self, WalError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("node_{node_id}_wal.json"));
        let temp_path = data_dir.join(format!("node_{node_id}_wal.json.tmp"));
        Ok(Self { path, temp_path })
    }

    /// Load the persisted state.
    ///
    /// Returns the default `(term 0, no vote, empty log)` when no file
    /// exists yet; a corrupt payload is an error.
    pub fn load(&self) -> Result<HardState, WalError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no WAL file, starting fresh");
            return Ok(HardState::default());
        }
        let raw = fs::read(&self.path)?;
        let state: HardState = serde_json::from_slice(&raw)?;
        info!(
            term = state.current_term,
            log_len = state.log.len(),
            "WAL loaded"
        );
        Ok(state)
    }

    /// Persist `state` crash-atomically.
    pub fn save(&self, state: &HardState) -> Result<(), WalError> {
        let payload = serde_json::to_vec_pretty(state)?;

        let mut file = File::create(&self.temp_path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;

        debug!(
            term = state.current_term,
            log_len = state.log.len(),
            "WAL saved"
        );
        Ok(())
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete any persisted state. Test affordance.
    pub fn clear(&self) -> Result<(), WalError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
