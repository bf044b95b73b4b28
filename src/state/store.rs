//! Crash-safe persistence for the gamification snapshot
//!
//! One JSON file per learner under the configured state directory. Saves
//! write to a sibling temp file, flush to disk, then atomically rename over
//! the destination so a crash mid-write never leaves a truncated snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::progression::UnitConfig;
use crate::state::GamificationState;
use crate::types::{CadenceError, Result};

/// File-backed store for [`GamificationState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Path of a learner's snapshot file.
    pub fn path_for(&self, username: &str) -> PathBuf {
        self.state_dir.join(format!("{username}.json"))
    }

    /// Usernames that currently have a snapshot on disk.
    pub fn known_users(&self) -> Result<Vec<String>> {
        if !self.state_dir.exists() {
            return Ok(Vec::new());
        }

        let mut users = Vec::new();
        for entry in fs::read_dir(&self.state_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    users.push(stem.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }

    /// Load a learner's snapshot, reconciled against the current curriculum.
    ///
    /// Missing file synthesizes the initial state; a present but malformed
    /// file is a [`CadenceError::StateFormat`] - never silently replaced.
    pub fn load(&self, username: &str, units: &[UnitConfig]) -> Result<GamificationState> {
        let path = self.path_for(username);
        if !path.exists() {
            debug!(username, "No snapshot on disk, synthesizing initial state");
            return Ok(GamificationState::initial(units));
        }

        let raw = fs::read_to_string(&path)?;
        let state: GamificationState = serde_json::from_str(&raw).map_err(|e| {
            CadenceError::StateFormat(format!("{}: {e}", path.display()))
        })?;

        Ok(state.reconcile(units))
    }

    /// Atomically persist a learner's snapshot.
    pub fn save(&self, username: &str, state: &GamificationState) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;

        let path = self.path_for(username);
        let body = serde_json::to_string_pretty(state)
            .map_err(|e| CadenceError::Internal(format!("Snapshot serialization failed: {e}")))?;

        write_atomic(&path, body.as_bytes())?;
        debug!(username, path = %path.display(), "Snapshot persisted");
        Ok(())
    }
}

/// Write to `<path>.tmp` in the same directory, flush, then rename into
/// place. Rename within one directory is atomic on POSIX filesystems.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        fs::remove_file(&tmp_path).ok();
        return Err(e.into());
    }
    Ok(())
}
