//! Folds one attempt's chunks into an assistant turn.

use super::StreamChunk;
use crate::message::{Message, TokenUsage, ToolCall};

/// The assembled result of a stream that reached `done`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedStream {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl CompletedStream {
    /// The assistant message to append to history.
    pub fn to_message(&self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content.clone())
        } else {
            Message::assistant_with_tools(self.content.clone(), self.tool_calls.clone())
        }
    }
}

/// Accumulates content, reasoning and tool-call deltas in emission order.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<TokenUsage>,
    chunks_seen: usize,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks folded so far.
    pub fn chunks_seen(&self) -> usize {
        self.chunks_seen
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        self.chunks_seen += 1;
        match chunk {
            StreamChunk::Content { text } => self.content.push_str(text),
            StreamChunk::ReasoningDelta { text } => self.reasoning.push_str(text),
            StreamChunk::ToolCallDelta {
                id,
                name,
                args_fragment,
            } => self.push_tool_delta(id, name.as_deref(), args_fragment),
            StreamChunk::Usage(usage) => self.usage = Some(*usage),
            StreamChunk::Done | StreamChunk::Error { .. } => {}
        }
    }

    fn push_tool_delta(&mut self, id: &str, name: Option<&str>, fragment: &str) {
        // An empty id continues the most recent call.
        let existing = if id.is_empty() {
            self.tool_calls.last_mut()
        } else {
            self.tool_calls.iter_mut().find(|c| c.id == id)
        };

        match existing {
            Some(call) => {
                if let Some(name) = name
                    && call.name.is_empty()
                {
                    call.name = name.to_string();
                }
                call.args_json.push_str(fragment);
            }
            None => self.tool_calls.push(ToolCall {
                id: id.to_string(),
                name: name.unwrap_or_default().to_string(),
                args_json: fragment.to_string(),
            }),
        }
    }

    pub fn finish(self) -> CompletedStream {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|mut call| {
                if call.args_json.trim().is_empty() {
                    call.args_json = "{}".to_string();
                }
                call
            })
            .collect();
        CompletedStream {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls,
            usage: self.usage,
        }
    }
}
