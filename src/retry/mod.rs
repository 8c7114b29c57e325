//! Retry and cancellation control for a single model attempt.
//!
//! ## Contract
//!
//! - Every attempt, including the first, runs under a fresh
//!   [`CancellationToken`] wrapped in an [`AttemptHandle`]. The handle is
//!   published through [`AttemptObserver::on_abort_token_changed`] before the
//!   attempt starts, so an external cancel always reaches the live attempt.
//! - Transport failures are retried after a fixed delay, up to
//!   `max_attempts` attempts in total. Rejections and fatal signals end the
//!   run immediately.
//! - Retry progress is published once per retry and cleared only after the
//!   next attempt has produced data, debounced so the status stays visible.
//! - Cancellation is checked before each attempt, on every chunk, and while
//!   waiting out the retry delay.

mod controller;

pub use controller::RetryController;

use crate::errors::StreamError;
use crate::stream::{CompletedStream, StreamChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Default debounce before a retry status is cleared.
pub const DEFAULT_STATUS_CLEAR_DELAY: Duration = Duration::from_millis(1000);

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub status_clear_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            status_clear_delay: DEFAULT_STATUS_CLEAR_DELAY,
        }
    }
}

/// The live attempt: its cancellation token and bookkeeping.
///
/// A handle is superseded by the next attempt's handle; its token is never
/// reused.
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    pub id: Uuid,
    /// 1-based attempt number; 0 for a context compression request.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl AttemptHandle {
    pub(crate) fn new(token: CancellationToken, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt,
            started_at: Utc::now(),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Retry progress shown while waiting between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatus {
    pub is_retrying: bool,
    /// The attempt about to start.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Length of the whole retry delay, rounded up. Published once per
    /// retry and not updated while the delay runs.
    pub remaining_seconds: u64,
    pub error_message: String,
}

/// Progress callbacks consumed by the UI layer.
///
/// All methods have empty defaults so observers implement only what they show.
pub trait AttemptObserver: Send + Sync {
    fn on_retry_status(&self, _status: Option<RetryStatus>) {}

    fn on_streaming_state_change(&self, _busy: bool) {}

    fn on_abort_token_changed(&self, _handle: &AttemptHandle) {}

    fn on_chunk(&self, _chunk: &StreamChunk) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {}

/// Holds the most recently published attempt handle.
///
/// This is the target for a user "stop" action: [`AttemptSlot::cancel`]
/// always reaches the attempt that is currently live, never a superseded one.
#[derive(Debug, Default)]
pub struct AttemptSlot {
    current: Mutex<Option<AttemptHandle>>,
}

impl AttemptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AttemptHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel the live attempt. Returns false when nothing has been published.
    pub fn cancel(&self) -> bool {
        match self.current() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

impl AttemptObserver for AttemptSlot {
    fn on_abort_token_changed(&self, handle: &AttemptHandle) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
    }
}

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct CompletedAttempt {
    pub stream: CompletedStream,
    /// Handle of the attempt that succeeded; stays live until superseded.
    pub handle: AttemptHandle,
    pub attempts: u32,
}

/// Terminal result of [`RetryController::run_attempt`].
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success(CompletedAttempt),
    /// The user stopped the attempt. Not an error.
    Aborted { attempts: u32 },
    /// Every attempt failed with a retryable error.
    RetryableError { error: StreamError, attempts: u32 },
    /// A rejection or fatal signal; never retried.
    FatalError { error: StreamError, attempts: u32 },
}

impl AttemptOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            AttemptOutcome::Success(done) => done.attempts,
            AttemptOutcome::Aborted { attempts }
            | AttemptOutcome::RetryableError { attempts, .. }
            | AttemptOutcome::FatalError { attempts, .. } => *attempts,
        }
    }
}
