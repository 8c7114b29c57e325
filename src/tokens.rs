//! Token accounting for message lists.
//!
//! Providers report exact usage after each attempt; between reports the loop
//! falls back to this estimate. We use ~4 characters per token, which matches
//! typical BPE tokenizers closely enough for threshold decisions.

use crate::message::Message;

/// Characters per token used by the estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed framing overhead per message (role markers, separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count of a piece of text.
pub fn count_text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the token count of one message, including its tool calls.
pub fn count_message_tokens(message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS + count_text_tokens(&message.content);
    for call in &message.tool_calls {
        tokens += count_text_tokens(&call.name) + count_text_tokens(&call.args_json);
    }
    tokens
}

/// Estimate the token count of a message list.
pub fn count_tokens(messages: &[Message]) -> usize {
    messages.iter().map(count_message_tokens).sum()
}
