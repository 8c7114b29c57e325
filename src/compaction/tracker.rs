//! Context usage tracking and compression decisions.

use super::config::{CompressionThreshold, parse_threshold};
use crate::message::{Message, TokenUsage};
use crate::tokens::count_tokens;
use serde::{Deserialize, Serialize};

/// Usage ratio at or above which only the last round is kept.
pub const CRITICAL_PRESSURE: f64 = 0.95;

/// Usage ratio at or above which the last two rounds are kept.
pub const HIGH_PRESSURE: f64 = 0.85;

/// Whether and how hard to compress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionDecision {
    pub should_compress: bool,
    pub keep_rounds: usize,
    /// Usage as a percentage of the context window.
    pub percentage: f64,
}

/// Number of complete rounds to preserve at a given usage ratio.
pub fn keep_rounds_for(ratio: f64) -> usize {
    if ratio >= CRITICAL_PRESSURE {
        1
    } else if ratio >= HIGH_PRESSURE {
        2
    } else {
        3
    }
}

/// Decide whether `total_tokens` out of `context_window` warrants compression.
pub fn decide(
    total_tokens: usize,
    context_window: usize,
    threshold: &CompressionThreshold,
) -> CompressionDecision {
    if context_window == 0 {
        return CompressionDecision {
            should_compress: false,
            keep_rounds: keep_rounds_for(0.0),
            percentage: 0.0,
        };
    }

    let ratio = total_tokens as f64 / context_window as f64;
    CompressionDecision {
        should_compress: ratio >= threshold.ratio(context_window),
        keep_rounds: keep_rounds_for(ratio),
        percentage: ratio * 100.0,
    }
}

/// Tracks a conversation's token usage between provider reports.
#[derive(Debug, Clone)]
pub struct ContextTracker {
    threshold: CompressionThreshold,
    context_window: usize,
    /// Last total reported by the provider, if any since the last compression.
    reported_tokens: Option<usize>,
    compressions: u32,
    tokens_compacted: usize,
}

impl ContextTracker {
    /// Create a tracker; an unparsable threshold falls back to the default.
    pub fn new(threshold: &str, context_window: usize) -> Self {
        Self::with_threshold(parse_threshold(threshold).unwrap_or_default(), context_window)
    }

    pub fn with_threshold(threshold: CompressionThreshold, context_window: usize) -> Self {
        Self {
            threshold,
            context_window,
            reported_tokens: None,
            compressions: 0,
            tokens_compacted: 0,
        }
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn threshold(&self) -> &CompressionThreshold {
        &self.threshold
    }

    /// Record usage reported at the end of an attempt.
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.reported_tokens = Some(usage.total() as usize);
    }

    /// Best current estimate: the larger of the last report and a fresh count,
    /// since messages appended after a report are not in it.
    pub fn current_tokens(&self, messages: &[Message]) -> usize {
        let estimate = count_tokens(messages);
        self.reported_tokens.map_or(estimate, |r| r.max(estimate))
    }

    pub fn decide(&self, total_tokens: usize) -> CompressionDecision {
        decide(total_tokens, self.context_window, &self.threshold)
    }

    /// Reset tracking after history was replaced by a compressed version.
    pub fn apply_compression(&mut self, tokens_before: usize, tokens_after: usize) {
        self.tokens_compacted += tokens_before.saturating_sub(tokens_after);
        self.reported_tokens = None;
        self.compressions += 1;
    }

    pub fn compressions(&self) -> u32 {
        self.compressions
    }

    pub fn tokens_saved(&self) -> usize {
        self.tokens_compacted
    }

    /// Get a status summary for display.
    pub fn status_summary(&self, messages: &[Message]) -> String {
        let used = self.current_tokens(messages);
        let decision = self.decide(used);
        format!(
            "Context: {:.1}% used ({} / {} tokens){}",
            decision.percentage,
            used,
            self.context_window,
            if self.compressions > 0 {
                format!(
                    ", {} compressions saved {} tokens",
                    self.compressions, self.tokens_compacted
                )
            } else {
                String::new()
            }
        )
    }
}
