//! Shared fixtures for integration tests: a scripted stream adapter and a
//! recording observer.

#![allow(dead_code)]

use async_trait::async_trait;
use ferry::errors::StreamError;
use ferry::message::{Message, TokenUsage};
use ferry::retry::{AttemptHandle, AttemptObserver, AttemptSlot, RetryStatus};
use ferry::stream::{ChunkStream, StreamAdapter, StreamChunk};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(StreamChunk),
    /// Sleep before producing the next chunk.
    Delay(Duration),
    /// Never produce another chunk.
    Hang,
}

/// What one `stream` call does.
#[derive(Debug, Clone)]
pub enum Script {
    Open(Vec<Step>),
    /// Fail while opening the connection.
    Refuse(StreamError),
}

pub fn content(text: &str) -> Step {
    Step::Chunk(StreamChunk::Content {
        text: text.to_string(),
    })
}

pub fn tool_call(id: &str, name: &str, args: &str) -> Step {
    Step::Chunk(StreamChunk::ToolCallDelta {
        id: id.to_string(),
        name: Some(name.to_string()),
        args_fragment: args.to_string(),
    })
}

pub fn usage(prompt: u64, completion: u64) -> Step {
    Step::Chunk(StreamChunk::Usage(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        cached_tokens: None,
    }))
}

pub fn done() -> Step {
    Step::Chunk(StreamChunk::Done)
}

pub fn transport_error(message: &str) -> Step {
    Step::Chunk(StreamChunk::Error {
        message: message.to_string(),
        status: None,
        fatal: false,
    })
}

pub fn rejected(status: u16, message: &str) -> Step {
    Step::Chunk(StreamChunk::Error {
        message: message.to_string(),
        status: Some(status),
        fatal: false,
    })
}

/// A plain text reply.
pub fn reply(text: &str) -> Script {
    Script::Open(vec![content(text), done()])
}

/// Plays back one script per `stream` call, in order.
///
/// Counts every chunk handed to the consumer and keeps the token and message
/// list of every call. Calls past the end of the script get a truncated
/// stream.
#[derive(Default)]
pub struct ScriptedAdapter {
    scripts: Mutex<VecDeque<Script>>,
    pulls: Arc<AtomicUsize>,
    tokens: Mutex<Vec<CancellationToken>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedAdapter {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    /// Chunks delivered across all calls.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        _model: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<ChunkStream, StreamError> {
        self.tokens.lock().unwrap().push(cancel);
        self.requests.lock().unwrap().push(messages.to_vec());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Open(Vec::new()));

        let steps: VecDeque<Step> = match script {
            Script::Refuse(error) => return Err(error),
            Script::Open(steps) => steps.into(),
        };
        let pulls = Arc::clone(&self.pulls);

        let stream = futures::stream::unfold(steps, move |mut steps| {
            let pulls = Arc::clone(&pulls);
            async move {
                loop {
                    match steps.pop_front()? {
                        Step::Delay(d) => tokio::time::sleep(d).await,
                        Step::Hang => std::future::pending::<()>().await,
                        Step::Chunk(chunk) => {
                            pulls.fetch_add(1, Ordering::SeqCst);
                            return Some((chunk, steps));
                        }
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Everything an observer saw, with the (tokio) time it was seen.
#[derive(Default)]
pub struct RecordingObserver {
    pub busy: Mutex<Vec<bool>>,
    pub statuses: Mutex<Vec<(Instant, Option<RetryStatus>)>>,
    pub handles: Mutex<Vec<AttemptHandle>>,
    pub chunks: Mutex<Vec<(Instant, StreamChunk)>>,
    pub slot: AttemptSlot,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn busy(&self) -> Vec<bool> {
        self.busy.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(Instant, Option<RetryStatus>)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn handles(&self) -> Vec<AttemptHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<(Instant, StreamChunk)> {
        self.chunks.lock().unwrap().clone()
    }
}

impl AttemptObserver for RecordingObserver {
    fn on_retry_status(&self, status: Option<RetryStatus>) {
        self.statuses.lock().unwrap().push((Instant::now(), status));
    }

    fn on_streaming_state_change(&self, busy: bool) {
        self.busy.lock().unwrap().push(busy);
    }

    fn on_abort_token_changed(&self, handle: &AttemptHandle) {
        self.handles.lock().unwrap().push(handle.clone());
        self.slot.on_abort_token_changed(handle);
    }

    fn on_chunk(&self, chunk: &StreamChunk) {
        self.chunks.lock().unwrap().push((Instant::now(), chunk.clone()));
    }
}
