//! Round detection and transcript rendering for summarization.

use crate::message::{Message, Role};
use crate::stream::truncate_str;
use std::ops::Range;

/// Instruction sent alongside the transcript when asking for a summary.
pub const SUMMARY_INSTRUCTION: &str = "You are compressing the earlier part of a coding \
session so it can continue within a limited context window. Summarize the transcript below. \
Keep: the user's goals and constraints, decisions made, files created or changed and why, \
commands run and their outcome, errors still unresolved, and the next step that was planned. \
Drop pleasantries and anything superseded. Tool outputs are omitted; rely on the calls. \
Write plain prose or short bullets, no preamble.";

/// Heading placed before the summary text in the spliced-in message.
pub const SUMMARY_HEADING: &str = "[Summary of earlier conversation]";

/// Maximum characters of tool-call arguments kept in the transcript.
const MAX_TRANSCRIPT_ARGS_CHARS: usize = 200;

/// Index ranges of every round, oldest first.
///
/// A round is an assistant message that requested tools plus the tool-result
/// messages that immediately follow it.
pub fn find_rounds(messages: &[Message]) -> Vec<Range<usize>> {
    let mut rounds = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        if messages[i].has_tool_calls() {
            let start = i;
            i += 1;
            while i < messages.len() && messages[i].role == Role::Tool {
                i += 1;
            }
            rounds.push(start..i);
        } else {
            i += 1;
        }
    }
    rounds
}

/// Number of leading system messages, which are never compressed.
pub fn leading_system_count(messages: &[Message]) -> usize {
    messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count()
}

/// Index where the preserved tail starts.
///
/// The tail holds the last `keep_rounds` complete rounds and everything after
/// them. With fewer rounds than that, every round is kept. With no rounds at
/// all, the tail starts at the most recent user message.
pub fn preserve_boundary(messages: &[Message], keep_rounds: usize) -> usize {
    let rounds = find_rounds(messages);
    let boundary = if rounds.is_empty() {
        messages
            .iter()
            .rposition(|m| m.role == Role::User && !m.is_summary)
            .unwrap_or(messages.len())
    } else {
        let keep = keep_rounds.max(1).min(rounds.len());
        rounds[rounds.len() - keep].start
    };
    boundary.max(leading_system_count(messages))
}

/// Whether `prefix` holds anything that is not already a summary.
pub fn has_uncompressed(prefix: &[Message]) -> bool {
    prefix
        .iter()
        .any(|m| !m.is_summary && m.role != Role::System)
}

/// Render older messages as a plain transcript, leaving out tool-result bodies.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => lines.push(format!("System: {}", msg.content)),
            Role::User if msg.is_summary => lines.push(format!("Earlier summary: {}", msg.content)),
            Role::User => lines.push(format!("User: {}", msg.content)),
            Role::Assistant => {
                if !msg.content.trim().is_empty() {
                    lines.push(format!("Assistant: {}", msg.content));
                }
                for call in &msg.tool_calls {
                    lines.push(format!(
                        "Tool {} called with args {}",
                        call.name,
                        truncate_str(&call.args_json, MAX_TRANSCRIPT_ARGS_CHARS)
                    ));
                }
            }
            Role::Tool => {}
        }
    }
    lines.join("\n")
}

/// Build the message that replaces the compressed prefix.
pub fn summary_message(summary: &str) -> Message {
    Message::summary(format!("{}\n{}", SUMMARY_HEADING, summary.trim()))
}
