//! Typed error hierarchy for the ferry execution core.
//!
//! Four top-level enums cover the four subsystems:
//! - `StreamError`: stream adapter / provider failures, classified retryable or terminal
//! - `TurnError`: terminal outcomes of a conversation turn
//! - `SnapshotError`: workspace snapshot persistence and restore failures
//! - `UndoError`: undo stack persistence and restore failures

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by a stream adapter while producing one attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Connection reset, timeout, 5xx, or any other transient transport fault.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The stream closed before the provider signalled turn completion.
    #[error("Stream ended before completion")]
    Truncated,

    /// The provider rejected the request (4xx, auth, quota).
    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// An explicit fatal signal from the provider.
    #[error("Fatal provider error: {message}")]
    Fatal { message: String },
}

impl StreamError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Transport { .. } | StreamError::Truncated)
    }

    /// Classify a raw provider failure from its HTTP status (if any) and message text.
    ///
    /// Any 4xx status is terminal. Without a status, authentication, quota and
    /// invalid-request wording is terminal and everything else is treated as transport.
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            Some(status) if (400..500).contains(&status) => StreamError::Rejected { status, message },
            Some(_) => StreamError::Transport { message },
            None if is_rejection_message(&message) => StreamError::Rejected {
                status: 400,
                message,
            },
            None => StreamError::Transport { message },
        }
    }
}

fn is_rejection_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("unauthorized")
        || msg.contains("invalid api key")
        || msg.contains("authentication")
        || msg.contains("forbidden")
        || msg.contains("quota")
        || msg.contains("insufficient_quota")
        || msg.contains("invalid_request")
        || msg.contains("context_length_exceeded")
}

/// Terminal failures of a conversation turn.
///
/// Cancellation is not an error; it is reported as `TurnOutcome::Aborted`.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: StreamError,
    },

    #[error("Provider rejected the request: {0}")]
    ProviderRejected(#[source] StreamError),
}

/// Errors from the workspace snapshot subsystem.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to walk workspace {root}: {message}")]
    Walk { root: PathBuf, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Path escapes the workspace: {0}")]
    OutsideWorkspace(PathBuf),

    #[error("Stored content for {path} could not be decoded")]
    Decode { path: PathBuf },

    #[error("Turn {turn_index} of session {session_id} is already committed")]
    TurnExists { session_id: String, turn_index: u32 },
}

/// Errors from the undo subsystem.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse undo entry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize undo entry: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Undo backing file missing: {0}")]
    MissingBackup(PathBuf),

    #[error("Stored content for {path} could not be decoded")]
    Decode { path: PathBuf },

    #[error("Turn {turn_index} of session {session_id} is already committed")]
    TurnExists { session_id: String, turn_index: u32 },
}
