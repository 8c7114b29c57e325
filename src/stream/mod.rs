//! Provider stream contract.
//!
//! Every provider client (OpenAI-compatible, Anthropic, Gemini, Responses API)
//! sits behind [`StreamAdapter`]: given a model, the message list and a
//! cancellation token it yields typed [`StreamChunk`]s until the provider
//! completes the turn or the token fires.

mod accumulator;

pub use accumulator::{ChunkAccumulator, CompletedStream};

use crate::errors::StreamError;
use crate::message::{Message, TokenUsage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One event from a provider stream. Transient; consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        text: String,
    },

    ToolCallDelta {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "argsFragment")]
        args_fragment: String,
    },

    ReasoningDelta {
        text: String,
    },

    Usage(TokenUsage),

    /// Provider signalled turn completion.
    Done,

    Error {
        message: String,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        fatal: bool,
    },
}

impl StreamChunk {
    /// Convert an error chunk into a classified [`StreamError`].
    pub fn as_error(&self) -> Option<StreamError> {
        match self {
            StreamChunk::Error { message, fatal, .. } if *fatal => Some(StreamError::Fatal {
                message: message.clone(),
            }),
            StreamChunk::Error {
                message, status, ..
            } => Some(StreamError::classify(*status, message.clone())),
            _ => None,
        }
    }
}

/// A pull-based chunk sequence; dropping it stops all further reads.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Per-provider streaming client.
#[async_trait]
pub trait StreamAdapter: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Open a stream for one attempt. Errors opening the connection are
    /// classified the same way as in-stream error chunks.
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<ChunkStream, StreamError>;
}

/// Extract a human-readable description of a tool call for logs.
pub fn describe_tool_call(name: &str, args_json: &str) -> String {
    let args: Value = serde_json::from_str(args_json).unwrap_or(Value::Null);
    let path = args
        .get("filePath")
        .or_else(|| args.get("path"))
        .and_then(|v| v.as_str())
        .map(shorten_path);

    match (name, path) {
        (n, Some(path)) if n.starts_with("filesystem-read") => format!("Reading: {}", path),
        (n, Some(path)) if n.starts_with("filesystem-create") => format!("Creating: {}", path),
        (n, Some(path)) if n.starts_with("filesystem-edit") => format!("Editing: {}", path),
        (n, Some(path)) if n.starts_with("filesystem-delete") => format!("Deleting: {}", path),
        (n, _) if n.starts_with("terminal") => {
            let cmd = args
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        (n, _) if n.starts_with("websearch") => {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "query".to_string());
            format!("Searching: {}", query)
        }
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate a string with ellipsis, respecting char boundaries.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_chunk() {
        let json = r#"{"type":"content","text":"Hello"}"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(
            chunk,
            StreamChunk::Content {
                text: "Hello".into()
            }
        );
    }

    #[test]
    fn test_parse_tool_call_delta_without_name() {
        let json = r#"{"type":"tool_call_delta","id":"call_1","argsFragment":"{\"pa"}"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        if let StreamChunk::ToolCallDelta {
            id,
            name,
            args_fragment,
        } = chunk
        {
            assert_eq!(id, "call_1");
            assert!(name.is_none());
            assert_eq!(args_fragment, "{\"pa");
        } else {
            panic!("Expected ToolCallDelta");
        }
    }

    #[test]
    fn test_parse_usage_chunk() {
        let json = r#"{"type":"usage","promptTokens":10,"completionTokens":5}"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        if let StreamChunk::Usage(usage) = chunk {
            assert_eq!(usage.total(), 15);
            assert!(usage.cached_tokens.is_none());
        } else {
            panic!("Expected Usage");
        }
    }

    #[test]
    fn test_error_chunk_classification() {
        let reset = StreamChunk::Error {
            message: "ECONNRESET".into(),
            status: None,
            fatal: false,
        };
        assert!(reset.as_error().unwrap().is_retryable());

        let auth = StreamChunk::Error {
            message: "unauthorized".into(),
            status: Some(401),
            fatal: false,
        };
        assert!(!auth.as_error().unwrap().is_retryable());

        let fatal = StreamChunk::Error {
            message: "stop".into(),
            status: Some(500),
            fatal: true,
        };
        assert!(matches!(fatal.as_error(), Some(StreamError::Fatal { .. })));

        assert!(StreamChunk::Done.as_error().is_none());
    }

    #[test]
    fn test_describe_tool_call() {
        assert_eq!(
            describe_tool_call("filesystem-edit", r#"{"filePath":"/repo/src/main.rs"}"#),
            "Editing: src/main.rs"
        );
        assert_eq!(
            describe_tool_call("terminal-execute", r#"{"command":"cargo test --release"}"#),
            "Running: cargo test --release"
        );
        assert_eq!(describe_tool_call("ace-search", "not json"), "ace-search");
    }

    #[test]
    fn test_truncate_str_unicode() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("ééééééé", 5), "éé...");
    }
}
