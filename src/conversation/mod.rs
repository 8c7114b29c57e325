//! The conversation loop: send, stream, run tools, repeat.
//!
//! A turn starts with a user message and runs rounds until the model answers
//! without requesting tools, the user cancels, the round cap is hit, or the
//! provider fails terminally. The workspace is baselined before the first
//! round and committed after the last one on every exit path.

mod tools;

pub use tools::{EDIT_TOOL_PREFIXES, ToolExecutor, ToolOutput, default_edit_targets, is_edit_tool};

use crate::compaction::{
    AdapterSummarizer, CompressorSettings, ContextCompressor, ContextTracker,
    DEFAULT_CONTEXT_WINDOW, Summarizer,
};
use crate::errors::TurnError;
use crate::message::{Message, ToolCall};
use crate::retry::{
    AttemptHandle, AttemptObserver, AttemptOutcome, NoopObserver, RetryController, RetryPolicy,
    RetryStatus,
};
use crate::snapshot::SnapshotManager;
use crate::stream::{StreamAdapter, StreamChunk, describe_tool_call};
use crate::undo::UndoManager;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default cap on rounds per turn.
pub const DEFAULT_MAX_ROUNDS: u32 = 100;

/// Content of the tool results appended when a turn is cancelled mid-dispatch.
const CANCELLED_TOOL_RESULT: &str = "Tool execution was cancelled by the user.";

/// How a turn ended, short of a terminal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed { content: String, rounds: u32 },
    Aborted { rounds: u32 },
    RoundLimitReached { content: String, rounds: u32 },
}

impl TurnOutcome {
    pub fn rounds(&self) -> u32 {
        match self {
            TurnOutcome::Completed { rounds, .. }
            | TurnOutcome::Aborted { rounds }
            | TurnOutcome::RoundLimitReached { rounds, .. } => *rounds,
        }
    }
}

/// Knobs for a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    pub model: String,
    pub max_rounds: u32,
    pub context_window: usize,
    pub retry: RetryPolicy,
    pub compression: CompressorSettings,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            context_window: DEFAULT_CONTEXT_WINDOW,
            retry: RetryPolicy::default(),
            compression: CompressorSettings::default(),
        }
    }
}

/// Forwards attempt callbacks but owns the busy flag itself, so the flag
/// stays raised across rounds and tool execution.
struct TurnObserver<'a> {
    inner: &'a dyn AttemptObserver,
}

impl AttemptObserver for TurnObserver<'_> {
    fn on_retry_status(&self, status: Option<RetryStatus>) {
        self.inner.on_retry_status(status);
    }

    fn on_abort_token_changed(&self, handle: &AttemptHandle) {
        self.inner.on_abort_token_changed(handle);
    }

    fn on_chunk(&self, chunk: &StreamChunk) {
        self.inner.on_chunk(chunk);
    }
}

/// One session's conversation state and its collaborators.
pub struct Conversation {
    session_id: String,
    model: String,
    max_rounds: u32,
    history: Vec<Message>,
    turn_index: u32,
    controller: RetryController,
    compressor: ContextCompressor,
    tracker: ContextTracker,
    snapshots: Option<Arc<SnapshotManager>>,
    undo: Option<Arc<UndoManager>>,
    observer: Arc<dyn AttemptObserver>,
}

impl Conversation {
    pub fn new(
        session_id: impl Into<String>,
        adapter: Arc<dyn StreamAdapter>,
        settings: ConversationSettings,
    ) -> Self {
        let summarizer: Arc<dyn Summarizer> =
            Arc::new(AdapterSummarizer::new(Arc::clone(&adapter), settings.model.clone()));
        Self {
            session_id: session_id.into(),
            tracker: ContextTracker::with_threshold(
                settings.compression.threshold.clone(),
                settings.context_window,
            ),
            compressor: ContextCompressor::new(summarizer, settings.compression),
            controller: RetryController::new(adapter, settings.retry),
            model: settings.model,
            max_rounds: settings.max_rounds.max(1),
            history: Vec::new(),
            turn_index: 0,
            snapshots: None,
            undo: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history.insert(0, Message::system(prompt));
        self
    }

    /// Resume from an existing history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_undo(mut self, undo: Arc<UndoManager>) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        let settings = self.compressor.settings().clone();
        self.compressor = ContextCompressor::new(summarizer, settings);
        self
    }

    /// Continue counting turns after a resumed history. Turns already
    /// committed to the attached snapshot store are skipped either way.
    pub fn with_turn_index(mut self, turn_index: u32) -> Self {
        self.turn_index = turn_index;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Index of the most recent turn; 0 before the first.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    /// Run one turn for `input`.
    ///
    /// Cancelling `cancel` (or the live attempt's handle) ends the turn as
    /// [`TurnOutcome::Aborted`]. Only exhausted retries and provider
    /// rejections are errors. History keeps everything appended before the
    /// turn ended.
    pub async fn run_turn(
        &mut self,
        input: impl Into<String>,
        tools: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.turn_index = self.turn_index.max(self.latest_committed_turn().await) + 1;
        let turn_index = self.turn_index;
        let observer = Arc::clone(&self.observer);

        observer.on_streaming_state_change(true);
        info!(session_id = %self.session_id, turn_index, "Turn started");

        self.begin_snapshot(turn_index).await;
        self.history.push(Message::user(input));

        let result = self
            .run_rounds(turn_index, tools, cancel, observer.as_ref())
            .await;

        self.commit_snapshot(turn_index).await;
        observer.on_streaming_state_change(false);

        match &result {
            Ok(outcome) => info!(
                session_id = %self.session_id,
                turn_index,
                rounds = outcome.rounds(),
                ?outcome,
                "Turn finished"
            ),
            Err(e) => warn!(session_id = %self.session_id, turn_index, error = %e, "Turn failed"),
        }
        result
    }

    async fn run_rounds(
        &mut self,
        turn_index: u32,
        tools: &dyn ToolExecutor,
        cancel: &CancellationToken,
        observer: &dyn AttemptObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let relay = TurnObserver { inner: observer };
        let mut last_content = String::new();

        for round in 1..=self.max_rounds {
            if cancel.is_cancelled() {
                return Ok(TurnOutcome::Aborted { rounds: round - 1 });
            }
            if !self.compress_if_needed(cancel, &relay).await {
                return Ok(TurnOutcome::Aborted { rounds: round - 1 });
            }

            debug!(turn_index, round, messages = self.history.len(), "Starting round");
            let outcome = self
                .controller
                .run_attempt(&self.history, &self.model, cancel, &relay)
                .await;

            let done = match outcome {
                AttemptOutcome::Success(done) => done,
                AttemptOutcome::Aborted { .. } => return Ok(TurnOutcome::Aborted { rounds: round }),
                AttemptOutcome::RetryableError { error, attempts } => {
                    return Err(TurnError::RetriesExhausted {
                        attempts,
                        last_error: error,
                    });
                }
                AttemptOutcome::FatalError { error, .. } => {
                    return Err(TurnError::ProviderRejected(error));
                }
            };

            if let Some(usage) = &done.stream.usage {
                self.tracker.record_usage(usage);
            }
            self.history.push(done.stream.to_message());
            last_content = done.stream.content.clone();

            if done.stream.tool_calls.is_empty() {
                return Ok(TurnOutcome::Completed {
                    content: last_content,
                    rounds: round,
                });
            }

            let finished = self
                .execute_tools(turn_index, &done.stream.tool_calls, tools, &done.handle)
                .await;
            if !finished || done.handle.is_cancelled() {
                return Ok(TurnOutcome::Aborted { rounds: round });
            }
        }

        warn!(turn_index, max_rounds = self.max_rounds, "Round limit reached");
        Ok(TurnOutcome::RoundLimitReached {
            content: last_content,
            rounds: self.max_rounds,
        })
    }

    /// Compress history at a round boundary if usage crossed the threshold.
    /// Returns false if cancelled while compressing.
    ///
    /// The summary request runs under its own published handle, so a stop
    /// issued through the observer reaches it instead of the previous round.
    async fn compress_if_needed(
        &mut self,
        cancel: &CancellationToken,
        observer: &dyn AttemptObserver,
    ) -> bool {
        let total = self.tracker.current_tokens(&self.history);
        if !self.tracker.decide(total).should_compress {
            return true;
        }

        let handle = AttemptHandle::new(cancel.child_token(), 0);
        observer.on_abort_token_changed(&handle);

        let result = tokio::select! {
            biased;
            _ = handle.token().cancelled() => None,
            result = self.compressor.maybe_compress(
                &self.history,
                total,
                self.tracker.context_window(),
            ) => Some(result),
        };
        let Some(result) = result.filter(|_| !handle.is_cancelled()) else {
            info!(session_id = %self.session_id, "Cancelled during compression");
            return false;
        };

        if result.compressed {
            self.tracker
                .apply_compression(result.tokens_before, result.tokens_after_estimate);
            self.history = result.messages;
            info!(
                session_id = %self.session_id,
                strategy = %result.strategy,
                compressions = self.tracker.compressions(),
                tokens_saved = self.tracker.tokens_saved(),
                "{}",
                self.tracker.status_summary(&self.history)
            );
        }
        true
    }

    /// Protect edit targets, run every call, and append results in call order.
    /// Returns false if the attempt was cancelled before all results arrived.
    async fn execute_tools(
        &mut self,
        turn_index: u32,
        calls: &[ToolCall],
        tools: &dyn ToolExecutor,
        handle: &AttemptHandle,
    ) -> bool {
        for call in calls {
            let targets = tools.edit_targets(&call.name, &call.args_json);
            if !targets.is_empty() {
                self.protect_edit(turn_index, &call.name, targets).await;
            }
        }

        for call in calls {
            debug!(
                id = %call.id,
                call = %describe_tool_call(&call.name, &call.args_json),
                "Dispatching tool"
            );
        }
        let pending = calls
            .iter()
            .map(|call| tools.execute(&call.name, &call.args_json));

        let outputs = tokio::select! {
            biased;
            _ = handle.token().cancelled() => None,
            outputs = join_all(pending) => Some(outputs),
        };

        match outputs {
            Some(outputs) => {
                for (call, output) in calls.iter().zip(outputs) {
                    if output.is_error {
                        debug!(id = %call.id, tool = %call.name, "Tool reported an error");
                    }
                    self.history
                        .push(Message::tool_result(&call.id, &call.name, output.content));
                }
                true
            }
            None => {
                info!(turn_index, calls = calls.len(), "Cancelled during tool execution");
                for call in calls {
                    self.history.push(Message::tool_result(
                        &call.id,
                        &call.name,
                        CANCELLED_TOOL_RESULT,
                    ));
                }
                false
            }
        }
    }

    /// Record undo state and capture pre-turn content before an edit runs.
    /// Failures only reduce recoverability and are logged.
    async fn protect_edit(&self, turn_index: u32, tool: &str, targets: Vec<String>) {
        if let Some(undo) = &self.undo {
            let undo = Arc::clone(undo);
            let session_id = self.session_id.clone();
            let tool_kind = tool.to_string();
            let paths = targets.clone();
            match tokio::task::spawn_blocking(move || {
                undo.capture_and_record(&session_id, &tool_kind, &paths)
            })
            .await
            {
                Ok(Ok(op)) => debug!(id = %op.id, tool, "Undo entry recorded"),
                Ok(Err(e)) => warn!(tool, error = %e, "Failed to record undo entry"),
                Err(e) => warn!(tool, error = %e, "Undo task failed"),
            }
        }

        if let Some(snapshots) = &self.snapshots {
            let snapshots = Arc::clone(snapshots);
            let session_id = self.session_id.clone();
            match tokio::task::spawn_blocking(move || {
                snapshots.capture(&session_id, turn_index, &targets)
            })
            .await
            {
                Ok(Ok(captured)) => debug!(captured, tool, "Pre-edit content captured"),
                Ok(Err(e)) => warn!(tool, error = %e, "Failed to capture pre-edit content"),
                Err(e) => warn!(tool, error = %e, "Capture task failed"),
            }
        }
    }

    /// Highest turn already committed for this session; 0 without snapshots.
    async fn latest_committed_turn(&self) -> u32 {
        let Some(snapshots) = &self.snapshots else {
            return 0;
        };
        let snapshots = Arc::clone(snapshots);
        let session_id = self.session_id.clone();
        match tokio::task::spawn_blocking(move || snapshots.latest_turn(&session_id)).await {
            Ok(Ok(latest)) => latest.unwrap_or(0),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to list committed turns");
                0
            }
            Err(e) => {
                warn!(error = %e, "Turn listing task failed");
                0
            }
        }
    }

    async fn begin_snapshot(&self, turn_index: u32) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshots = Arc::clone(snapshots);
        let session_id = self.session_id.clone();
        match tokio::task::spawn_blocking(move || snapshots.begin(&session_id, turn_index)).await {
            Ok(Ok(tracked)) => debug!(turn_index, tracked, "Workspace baselined"),
            Ok(Err(e)) => warn!(turn_index, error = %e, "Snapshot baseline failed; turn is not recoverable"),
            Err(e) => warn!(turn_index, error = %e, "Snapshot baseline task failed"),
        }
    }

    async fn commit_snapshot(&self, turn_index: u32) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshots = Arc::clone(snapshots);
        let session_id = self.session_id.clone();
        match tokio::task::spawn_blocking(move || snapshots.commit(&session_id, Some(turn_index)))
            .await
        {
            Ok(Ok(Some(turn))) => debug!(turn_index, files = turn.backups.len(), "Turn snapshot saved"),
            Ok(Ok(None)) => debug!(turn_index, "No workspace changes in turn"),
            Ok(Err(e)) => warn!(turn_index, error = %e, "Snapshot commit failed; turn is not recoverable"),
            Err(e) => warn!(turn_index, error = %e, "Snapshot commit task failed"),
        }
    }
}
