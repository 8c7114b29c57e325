//! Context compressor: summarize older history, or truncate when that fails.

use super::config::CompressionThreshold;
use super::summary::{
    SUMMARY_INSTRUCTION, has_uncompressed, leading_system_count, preserve_boundary,
    render_transcript, summary_message,
};
use super::tracker::{CompressionDecision, decide};
use super::{DEFAULT_MAX_TOOL_RESULT_CHARS, DEFAULT_TRUNCATION_KEEP_CHARS};
use crate::errors::StreamError;
use crate::message::{Message, Role};
use crate::stream::{ChunkAccumulator, StreamAdapter, StreamChunk};
use crate::tokens::count_tokens;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Prefix of a tool-result body that was replaced by a placeholder.
const TRUNCATED_RESULT_PREFIX: &str = "tool result truncated:";

/// Marker fragment inside a head+tail slice.
const SLICE_MARKER_SUFFIX: &str = "chars truncated ...]";

/// Produces a summary of a rendered transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, instruction: &str, transcript: &str) -> Result<String, StreamError>;
}

/// Summarizes by streaming a one-shot request through a [`StreamAdapter`].
///
/// The request gets its own token, cancelled when the future is dropped. The
/// conversation loop drops it as soon as the compression handle is stopped,
/// which tears the stream down.
pub struct AdapterSummarizer {
    adapter: Arc<dyn StreamAdapter>,
    model: String,
}

impl AdapterSummarizer {
    pub fn new(adapter: Arc<dyn StreamAdapter>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Summarizer for AdapterSummarizer {
    async fn summarize(&self, instruction: &str, transcript: &str) -> Result<String, StreamError> {
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        let messages = vec![Message::system(instruction), Message::user(transcript)];

        let mut stream = self.adapter.stream(&self.model, &messages, token).await?;
        let mut acc = ChunkAccumulator::new();
        while let Some(chunk) = stream.next().await {
            if let Some(error) = chunk.as_error() {
                return Err(error);
            }
            if chunk == StreamChunk::Done {
                return Ok(acc.finish().content);
            }
            acc.push(&chunk);
        }
        Err(StreamError::Truncated)
    }
}

/// How a compression pass changed the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    Summarized,
    Truncated,
    Unchanged,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionStrategy::Summarized => write!(f, "summarized"),
            CompressionStrategy::Truncated => write!(f, "truncated"),
            CompressionStrategy::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Output of [`ContextCompressor::maybe_compress`].
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub compressed: bool,
    pub messages: Vec<Message>,
    pub strategy: CompressionStrategy,
    pub decision: CompressionDecision,
    pub tokens_before: usize,
    pub tokens_after_estimate: usize,
}

/// Tunables for the compressor.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorSettings {
    pub threshold: CompressionThreshold,
    /// Tail tool results longer than this are shrunk by the fallback.
    pub max_tool_result_chars: usize,
    /// Characters kept from each end of a shrunk result.
    pub truncation_keep_chars: usize,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold: CompressionThreshold::default(),
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            truncation_keep_chars: DEFAULT_TRUNCATION_KEEP_CHARS,
        }
    }
}

/// Keeps a conversation under its token budget.
pub struct ContextCompressor {
    summarizer: Option<Arc<dyn Summarizer>>,
    settings: CompressorSettings,
}

impl ContextCompressor {
    pub fn new(summarizer: Arc<dyn Summarizer>, settings: CompressorSettings) -> Self {
        Self {
            summarizer: Some(summarizer),
            settings,
        }
    }

    /// A compressor that only ever truncates.
    pub fn truncating(settings: CompressorSettings) -> Self {
        Self {
            summarizer: None,
            settings,
        }
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    pub fn decide(&self, total_tokens: usize, max_context_tokens: usize) -> CompressionDecision {
        decide(total_tokens, max_context_tokens, &self.settings.threshold)
    }

    /// Compress `messages` if `total_tokens` crosses the threshold.
    ///
    /// Leading system messages and the last `keep_rounds` complete rounds are
    /// always kept verbatim and in order. Summarization failures fall back to
    /// truncation and are never returned as errors.
    pub async fn maybe_compress(
        &self,
        messages: &[Message],
        total_tokens: usize,
        max_context_tokens: usize,
    ) -> CompressionResult {
        let decision = self.decide(total_tokens, max_context_tokens);
        if !decision.should_compress {
            return self.unchanged(messages, decision, total_tokens);
        }

        let lead = leading_system_count(messages);
        let boundary = preserve_boundary(messages, decision.keep_rounds);
        let prefix = &messages[lead..boundary];
        debug!(
            percentage = decision.percentage,
            keep_rounds = decision.keep_rounds,
            boundary,
            prefix_len = prefix.len(),
            "Compression triggered"
        );

        if has_uncompressed(prefix)
            && let Some(summarizer) = &self.summarizer
        {
            let transcript = render_transcript(prefix);
            match summarizer.summarize(SUMMARY_INSTRUCTION, &transcript).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    let mut out = Vec::with_capacity(lead + 1 + messages.len() - boundary);
                    out.extend_from_slice(&messages[..lead]);
                    out.push(summary_message(&summary));
                    out.extend_from_slice(&messages[boundary..]);
                    return self.finish(out, CompressionStrategy::Summarized, decision, total_tokens);
                }
                Ok(_) => warn!("Summarizer returned an empty summary; truncating instead"),
                Err(e) => warn!(error = %e, "Summarization failed; truncating instead"),
            }
        }

        let (out, changed) = self.truncate(messages, boundary);
        if !changed {
            return self.unchanged(messages, decision, total_tokens);
        }
        self.finish(out, CompressionStrategy::Truncated, decision, total_tokens)
    }

    /// Placeholder old tool results and shrink oversized tail results.
    fn truncate(&self, messages: &[Message], boundary: usize) -> (Vec<Message>, bool) {
        let mut changed = false;
        let out = messages
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                if msg.role != Role::Tool {
                    return msg.clone();
                }
                let replacement = if i < boundary {
                    placeholder(msg)
                } else {
                    self.shrink(&msg.content)
                };
                match replacement {
                    Some(content) => {
                        changed = true;
                        Message {
                            content,
                            ..msg.clone()
                        }
                    }
                    None => msg.clone(),
                }
            })
            .collect();
        (out, changed)
    }

    /// Head+tail slice of an oversized result, or None if it fits.
    fn shrink(&self, content: &str) -> Option<String> {
        let total = content.chars().count();
        let keep = self.settings.truncation_keep_chars;
        if total <= self.settings.max_tool_result_chars
            || total <= keep * 2
            || content.contains(SLICE_MARKER_SUFFIX)
        {
            return None;
        }
        let head: String = content.chars().take(keep).collect();
        let tail: String = content.chars().skip(total - keep).collect();
        Some(format!(
            "{}\n[... {} {}\n{}",
            head,
            total - keep * 2,
            SLICE_MARKER_SUFFIX,
            tail
        ))
    }

    fn unchanged(
        &self,
        messages: &[Message],
        decision: CompressionDecision,
        total_tokens: usize,
    ) -> CompressionResult {
        CompressionResult {
            compressed: false,
            messages: messages.to_vec(),
            strategy: CompressionStrategy::Unchanged,
            decision,
            tokens_before: total_tokens,
            tokens_after_estimate: total_tokens,
        }
    }

    fn finish(
        &self,
        messages: Vec<Message>,
        strategy: CompressionStrategy,
        decision: CompressionDecision,
        total_tokens: usize,
    ) -> CompressionResult {
        let tokens_after_estimate = count_tokens(&messages);
        info!(
            %strategy,
            tokens_before = total_tokens,
            tokens_after = tokens_after_estimate,
            messages = messages.len(),
            "Compressed conversation history"
        );
        CompressionResult {
            compressed: true,
            messages,
            strategy,
            decision,
            tokens_before: total_tokens,
            tokens_after_estimate,
        }
    }
}

fn placeholder(msg: &Message) -> Option<String> {
    if msg.content.starts_with(TRUNCATED_RESULT_PREFIX) {
        return None;
    }
    Some(format!(
        "{} {}, {} chars",
        TRUNCATED_RESULT_PREFIX,
        msg.name.as_deref().unwrap_or("unknown"),
        msg.content.chars().count()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use std::sync::Mutex;

    struct FixedSummarizer {
        reply: Result<String, StreamError>,
        transcripts: Mutex<Vec<String>>,
    }

    impl FixedSummarizer {
        fn new(reply: Result<String, StreamError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                transcripts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _instruction: &str, transcript: &str) -> Result<String, StreamError> {
            self.transcripts.lock().unwrap().push(transcript.to_string());
            self.reply.clone()
        }
    }

    fn history(rounds: usize, body: &str) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("task")];
        for r in 0..rounds {
            let id = format!("call-{}", r);
            msgs.push(Message::assistant_with_tools(
                format!("step {}", r),
                vec![ToolCall {
                    id: id.clone(),
                    name: "filesystem-read".into(),
                    args_json: "{}".into(),
                }],
            ));
            msgs.push(Message::tool_result(id, "filesystem-read", body));
        }
        msgs
    }

    #[tokio::test]
    async fn test_below_threshold_is_unchanged() {
        let compressor =
            ContextCompressor::new(FixedSummarizer::new(Ok("s".into())), CompressorSettings::default());
        let msgs = history(6, "body");
        let result = compressor.maybe_compress(&msgs, 7_000, 10_000).await;
        assert!(!result.compressed);
        assert_eq!(result.strategy, CompressionStrategy::Unchanged);
        assert_eq!(result.messages, msgs);
    }

    #[tokio::test]
    async fn test_summarizes_prefix_and_keeps_three_rounds() {
        let summarizer = FixedSummarizer::new(Ok("the gist".into()));
        let compressor = ContextCompressor::new(summarizer.clone(), CompressorSettings::default());
        let msgs = history(6, "body");

        let result = compressor.maybe_compress(&msgs, 8_200, 10_000).await;
        assert!(result.compressed);
        assert_eq!(result.strategy, CompressionStrategy::Summarized);
        assert_eq!(result.decision.keep_rounds, 3);
        // system + summary + 3 rounds of 2 messages
        assert_eq!(result.messages.len(), 8);
        assert_eq!(result.messages[0], msgs[0]);
        assert!(result.messages[1].is_summary);
        assert_eq!(&result.messages[2..], &msgs[8..]);

        let transcripts = summarizer.transcripts.lock().unwrap();
        assert!(transcripts[0].contains("User: task"));
        assert!(!transcripts[0].contains("body"));
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let compressor =
            ContextCompressor::new(FixedSummarizer::new(Ok("gist".into())), CompressorSettings::default());
        let first = compressor.maybe_compress(&history(6, "body"), 8_200, 10_000).await;
        let second = compressor
            .maybe_compress(&first.messages, 8_200, 10_000)
            .await;
        assert!(!second.compressed);
        assert_eq!(second.messages, first.messages);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_truncation() {
        let compressor = ContextCompressor::new(
            FixedSummarizer::new(Err(StreamError::Transport {
                message: "reset".into(),
            })),
            CompressorSettings::default(),
        );
        let msgs = history(6, "0123456789");

        let result = compressor.maybe_compress(&msgs, 8_200, 10_000).await;
        assert!(result.compressed);
        assert_eq!(result.strategy, CompressionStrategy::Truncated);
        assert_eq!(result.messages.len(), msgs.len());
        assert_eq!(
            result.messages[3].content,
            "tool result truncated: filesystem-read, 10 chars"
        );
        // preserved rounds keep their small results
        assert_eq!(result.messages[13].content, "0123456789");
        for (a, b) in result.messages.iter().zip(&msgs) {
            assert_eq!(a.role, b.role);
        }
    }

    #[tokio::test]
    async fn test_empty_summary_falls_back() {
        let compressor =
            ContextCompressor::new(FixedSummarizer::new(Ok("   ".into())), CompressorSettings::default());
        let result = compressor.maybe_compress(&history(6, "x"), 8_200, 10_000).await;
        assert_eq!(result.strategy, CompressionStrategy::Truncated);
    }

    #[tokio::test]
    async fn test_oversized_tail_result_is_sliced() {
        let settings = CompressorSettings {
            max_tool_result_chars: 100,
            truncation_keep_chars: 10,
            ..CompressorSettings::default()
        };
        let compressor = ContextCompressor::truncating(settings);
        let body = format!("{}{}{}", "h".repeat(10), "m".repeat(200), "t".repeat(10));
        let msgs = history(1, &body);

        let result = compressor.maybe_compress(&msgs, 9_900, 10_000).await;
        assert_eq!(result.strategy, CompressionStrategy::Truncated);
        let sliced = &result.messages[3].content;
        assert!(sliced.starts_with("hhhhhhhhhh\n[... 200 chars truncated ...]"));
        assert!(sliced.ends_with("tttttttttt"));

        let again = compressor.maybe_compress(&result.messages, 9_900, 10_000).await;
        assert!(!again.compressed);
    }
}
