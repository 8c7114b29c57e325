//! Context Compression
//!
//! Keeps a conversation under the model's context window by replacing older
//! history with a summary before a round is sent.
//!
//! ## Strategy
//!
//! - **Trigger**: usage at or above the threshold (default 80% of the window)
//! - **Adaptive retention**: keep 3 complete rounds, 2 at 85% pressure, 1 at 95%
//! - **Summarize**: older messages become a transcript without tool-result
//!   bodies, which the model condenses into one leading message
//! - **Fallback**: when summarization fails, old tool results are replaced by a
//!   placeholder and oversized recent results are sliced to head and tail
//!
//! A round is never split and roles are never reordered.
//!
//! ## Configuration
//!
//! ```toml
//! [compaction]
//! threshold = "80%"          # or an absolute token count
//! max_tool_result_chars = 8000
//! truncation_keep_chars = 2000
//! ```

mod config;
mod manager;
mod summary;
mod tracker;

pub use config::{CompressionThreshold, parse_threshold};
pub use manager::{
    AdapterSummarizer, CompressionResult, CompressionStrategy, CompressorSettings,
    ContextCompressor, Summarizer,
};
pub use summary::{
    SUMMARY_INSTRUCTION, find_rounds, leading_system_count, preserve_boundary, render_transcript,
};
pub use tracker::{CompressionDecision, ContextTracker, decide, keep_rounds_for};

/// Default context window in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Tool results in the preserved tail longer than this are sliced by the fallback.
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 8_000;

/// Characters kept from each end of a sliced tool result.
pub const DEFAULT_TRUNCATION_KEEP_CHARS: usize = 2_000;
