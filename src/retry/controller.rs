use super::{
    AttemptHandle, AttemptObserver, AttemptOutcome, CompletedAttempt, RetryPolicy, RetryStatus,
};
use crate::errors::StreamError;
use crate::message::Message;
use crate::stream::{ChunkAccumulator, CompletedStream, StreamAdapter, StreamChunk};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one request to a terminal outcome under the retry policy.
pub struct RetryController {
    adapter: Arc<dyn StreamAdapter>,
    policy: RetryPolicy,
}

enum AttemptFailure {
    Cancelled,
    Stream(StreamError),
}

/// Whether a retry status is on screen and still needs clearing.
#[derive(Default)]
struct StatusState {
    pending: bool,
}

impl RetryController {
    pub fn new(adapter: Arc<dyn StreamAdapter>, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn adapter(&self) -> &Arc<dyn StreamAdapter> {
        &self.adapter
    }

    /// Run attempts until success, cancellation, a terminal error, or the
    /// attempt budget is spent.
    ///
    /// Each attempt's token is a child of `parent`, so cancelling `parent`
    /// stops whatever attempt is live. The busy flag is raised for the whole
    /// call, including retry delays.
    pub async fn run_attempt(
        &self,
        messages: &[Message],
        model: &str,
        parent: &CancellationToken,
        observer: &dyn AttemptObserver,
    ) -> AttemptOutcome {
        observer.on_streaming_state_change(true);
        let mut status = StatusState::default();

        let outcome = self
            .drive(messages, model, parent, observer, &mut status)
            .await;

        if status.pending {
            observer.on_retry_status(None);
        }
        observer.on_streaming_state_change(false);
        outcome
    }

    async fn drive(
        &self,
        messages: &[Message],
        model: &str,
        parent: &CancellationToken,
        observer: &dyn AttemptObserver,
        status: &mut StatusState,
    ) -> AttemptOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut previous: Option<AttemptHandle> = None;
        let mut attempt = 0u32;

        loop {
            if parent.is_cancelled() || previous.as_ref().is_some_and(|h| h.is_cancelled()) {
                info!(attempt, "Cancelled before attempt start");
                return AttemptOutcome::Aborted { attempts: attempt };
            }

            attempt += 1;
            let handle = AttemptHandle::new(parent.child_token(), attempt);
            observer.on_abort_token_changed(&handle);
            debug!(
                attempt,
                max_attempts,
                provider = self.adapter.name(),
                "Starting attempt"
            );

            let failure = match self
                .stream_once(messages, model, &handle, observer, status)
                .await
            {
                Ok(stream) => {
                    return AttemptOutcome::Success(CompletedAttempt {
                        stream,
                        handle,
                        attempts: attempt,
                    });
                }
                Err(failure) => failure,
            };

            let error = match failure {
                AttemptFailure::Cancelled => {
                    info!(attempt, "Attempt cancelled");
                    return AttemptOutcome::Aborted { attempts: attempt };
                }
                AttemptFailure::Stream(error) => error,
            };

            if !error.is_retryable() {
                warn!(attempt, error = %error, "Provider rejected request; not retrying");
                return AttemptOutcome::FatalError {
                    error,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                warn!(attempt, error = %error, "Retries exhausted");
                return AttemptOutcome::RetryableError {
                    error,
                    attempts: attempt,
                };
            }

            warn!(
                attempt,
                max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                error = %error,
                "Transport error; retrying"
            );
            observer.on_retry_status(Some(RetryStatus {
                is_retrying: true,
                attempt: attempt + 1,
                max_attempts,
                remaining_seconds: self.policy.delay.as_secs_f64().ceil() as u64,
                error_message: error.to_string(),
            }));
            status.pending = true;

            tokio::select! {
                biased;
                _ = handle.token().cancelled() => {
                    info!(attempt, "Cancelled during retry delay");
                    return AttemptOutcome::Aborted { attempts: attempt };
                }
                _ = sleep(self.policy.delay) => {}
            }

            previous = Some(handle);
        }
    }

    async fn stream_once(
        &self,
        messages: &[Message],
        model: &str,
        handle: &AttemptHandle,
        observer: &dyn AttemptObserver,
        status: &mut StatusState,
    ) -> Result<CompletedStream, AttemptFailure> {
        let token = handle.token().clone();

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AttemptFailure::Cancelled),
            opened = self.adapter.stream(model, messages, token.clone()) => {
                opened.map_err(AttemptFailure::Stream)?
            }
        };

        let mut acc = ChunkAccumulator::new();
        let mut clear_at: Option<Instant> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AttemptFailure::Cancelled),
                _ = wait_until(clear_at) => {
                    observer.on_retry_status(None);
                    status.pending = false;
                    clear_at = None;
                    continue;
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                return Err(AttemptFailure::Stream(StreamError::Truncated));
            };

            if status.pending && clear_at.is_none() {
                clear_at = Some(Instant::now() + self.policy.status_clear_delay);
            }

            observer.on_chunk(&chunk);

            if let Some(error) = chunk.as_error() {
                return Err(AttemptFailure::Stream(error));
            }
            if chunk == StreamChunk::Done {
                debug!(chunks = acc.chunks_seen(), "Stream completed");
                return Ok(acc.finish());
            }
            acc.push(&chunk);

            if token.is_cancelled() {
                return Err(AttemptFailure::Cancelled);
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
