//! Fine-grained undo of individual edit operations.
//!
//! Each edit-family tool call records the pre-edit content of the files it
//! targets. Entries live on a per-session stack capped at a fixed capacity;
//! pushing past capacity evicts the oldest entry and deletes its backing file.
//!
//! Backing files: `<data_dir>/undo/<session>/<id>.json`.

mod manager;

pub use manager::UndoManager;

use crate::content::ContentEncoding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default number of operations kept per session.
pub const DEFAULT_UNDO_CAPACITY: usize = 100;

/// Stack metadata for one recorded edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOperation {
    pub id: String,
    pub session_id: String,
    pub tool_kind: String,
    pub file_paths: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Path of the backing file.
    pub backup_ref: PathBuf,
}

/// The backing document of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UndoRecord {
    #[serde(default)]
    pub session_id: String,
    pub tool: String,
    pub file_paths: Vec<String>,
    /// Pre-edit content per path; `None` means the file did not exist.
    pub original_contents: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encodings: BTreeMap<String, ContentEncoding>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Result of restoring one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRestoreResult {
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileRestoreResult {
    fn ok(path: &str) -> Self {
        Self {
            path: path.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(path: &str, error: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// What an undo call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    /// Operations popped, newest first.
    pub operations: Vec<UndoOperation>,
    pub files: Vec<FileRestoreResult>,
}

impl UndoReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.success).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }
}
