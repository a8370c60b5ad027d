use crate::errors::{Result, UnstackedError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn state_file_name(stack_name: &str) -> String {
    format!("SYNC_STATE_{stack_name}")
}

/// Pre-rewrite position of one change, recorded before a sync pass
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncStateEntry {
    pub change_id: Uuid,
    pub branch: String,
    /// Commit hash the change had when the pass started
    pub old_hash: String,
}

/// Durable record of an in-flight synchronization pass.
///
/// Written before the first ref moves, deleted after the stack metadata
/// is saved. While it exists, the parent chain may legitimately have one
/// seam (the first not-yet-rewritten change), and loading validates
/// against the old hashes recorded here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncState {
    /// Stack being synchronized
    pub stack_name: String,
    /// Base the stack was built on when the pass started
    pub previous_base: String,
    /// Base the pass is rebuilding onto
    pub target_base: String,
    /// Changes in target order with their pre-pass hashes
    pub entries: Vec<SyncStateEntry>,
}

impl SyncState {
    fn path(state_dir: &Path, stack_name: &str) -> PathBuf {
        state_dir.join(state_file_name(stack_name))
    }

    pub fn exists(state_dir: &Path, stack_name: &str) -> bool {
        Self::path(state_dir, stack_name).exists()
    }

    /// Record the pre-pass hash of a change, if present
    pub fn old_hash_of(&self, change_id: &Uuid) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| &e.change_id == change_id)
            .map(|e| e.old_hash.as_str())
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(state_dir).map_err(|e| {
            UnstackedError::config(format!("Failed to create state directory: {e}"))
        })?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UnstackedError::config(format!("Failed to serialize sync state: {e}")))?;
        let path = Self::path(state_dir, &self.stack_name);
        std::fs::write(&path, json)
            .map_err(|e| UnstackedError::config(format!("Failed to write sync state: {e}")))?;
        tracing::debug!("Saved sync state to {path:?}");
        Ok(())
    }

    pub fn load(state_dir: &Path, stack_name: &str) -> Result<Option<Self>> {
        let path = Self::path(state_dir, stack_name);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)
            .map_err(|e| UnstackedError::config(format!("Failed to read sync state: {e}")))?;
        let state: Self = serde_json::from_str(&json)
            .map_err(|e| UnstackedError::config(format!("Failed to parse sync state: {e}")))?;
        Ok(Some(state))
    }

    pub fn delete(state_dir: &Path, stack_name: &str) -> Result<()> {
        let path = Self::path(state_dir, stack_name);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| UnstackedError::config(format!("Failed to delete sync state: {e}")))?;
            tracing::debug!("Deleted sync state file");
        }
        Ok(())
    }
}
