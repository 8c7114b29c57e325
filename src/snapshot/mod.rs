//! Workspace snapshots for coarse, per-turn rollback.
//!
//! A turn is baselined by hashing every tracked file before the first round,
//! then committed after the loop exits by diffing against disk. Only changed
//! paths are persisted: pre-turn content for modified and deleted files, and a
//! bare "did not exist" marker for new files.
//!
//! Baselines are keyed `session:turn`, so concurrent sub-sessions never see
//! each other's state. Committed turn files are never rewritten: committing
//! an index that already has a file fails. Rollback reads them and, on a full
//! rollback, deletes them once consumed.
//!
//! Baseline content is cached in memory up to a per-file cap and a total
//! budget. Files beyond either are hashed only; their pre-turn content is
//! recoverable only if [`SnapshotManager::capture`] ran before the edit.

mod manager;
mod store;
mod walk;

pub use manager::SnapshotManager;

/// Default total bytes of pre-turn content cached per baseline.
pub const DEFAULT_BASELINE_CACHE_BYTES: u64 = 64 * 1024 * 1024;

use crate::content::ContentEncoding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hash and metadata of one tracked file. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub relative_path: String,
    pub hash: String,
    pub size: u64,
    pub mtime_ms: i64,
}

/// Pre-turn state of one changed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBackup {
    pub relative_path: String,
    /// Content before the turn; `None` for new files and unrecoverable ones.
    pub previous_content: Option<String>,
    pub existed_before: bool,
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

/// One committed turn, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTurn {
    pub session_id: String,
    pub turn_index: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub workspace_root: PathBuf,
    pub backups: Vec<FileBackup>,
}

/// A turn that can be rolled back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPoint {
    pub turn_index: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub file_count: usize,
    pub paths: Vec<String>,
}

/// A path that could not be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// A committed turn that could not be read during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFailure {
    pub turn_index: u32,
    pub error: String,
}

/// What a rollback did, per file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    /// Turns consumed, newest first.
    pub turns: Vec<u32>,
    pub restored: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<FileFailure>,
    /// Turns skipped because their file could not be read. Their paths were
    /// not touched and the files are kept.
    #[serde(default)]
    pub failed_turns: Vec<TurnFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.failed_turns.is_empty()
    }

    /// One-line summary for display.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} turn(s): {} restored, {} deleted, {} failed",
            self.turns.len(),
            self.restored.len(),
            self.deleted.len(),
            self.failed.len()
        );
        if !self.failed_turns.is_empty() {
            summary.push_str(&format!(", {} unreadable turn(s)", self.failed_turns.len()));
        }
        summary
    }
}
