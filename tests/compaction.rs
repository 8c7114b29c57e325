mod support;

use ferry::compaction::{
    AdapterSummarizer, CompressionStrategy, CompressorSettings, ContextCompressor,
    SUMMARY_INSTRUCTION, find_rounds,
};
use ferry::message::{Message, Role, ToolCall};
use std::sync::Arc;
use support::*;

fn round(i: usize, result: &str) -> Vec<Message> {
    let id = format!("call-{}", i);
    vec![
        Message::assistant_with_tools(
            format!("checking file {}", i),
            vec![ToolCall {
                id: id.clone(),
                name: "filesystem-read".into(),
                args_json: format!(r#"{{"filePath":"src/f{}.rs"}}"#, i),
            }],
        ),
        Message::tool_result(id, "filesystem-read", result),
    ]
}

fn six_rounds() -> Vec<Message> {
    let mut history = vec![Message::system("rules"), Message::user("fix the build")];
    for i in 0..6 {
        history.extend(round(i, "file body"));
    }
    history
}

#[tokio::test]
async fn test_82_percent_keeps_three_rounds_behind_a_summary() {
    let adapter = ScriptedAdapter::new(vec![Script::Open(vec![
        content("The user asked to fix the build; "),
        content("files f0-f2 were read."),
        done(),
    ])]);
    let compressor = ContextCompressor::new(
        Arc::new(AdapterSummarizer::new(adapter.clone(), "small-model")),
        CompressorSettings::default(),
    );
    let history = six_rounds();

    let result = compressor.maybe_compress(&history, 8_200, 10_000).await;

    assert!(result.compressed);
    assert_eq!(result.strategy, CompressionStrategy::Summarized);
    assert_eq!(result.decision.keep_rounds, 3);
    // system + summary + 3 rounds of 2 messages
    assert_eq!(result.messages.len(), 8);
    assert_eq!(result.messages[0].role, Role::System);
    assert!(result.messages[1].is_summary);
    assert!(result.messages[1].content.contains("files f0-f2 were read."));
    assert_eq!(&result.messages[2..], &history[8..]);
    assert_eq!(find_rounds(&result.messages).len(), 3);
    assert!(result.tokens_after_estimate < result.tokens_before);

    // The summarizer saw the instruction and a transcript without tool bodies.
    let requests = adapter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0].content, SUMMARY_INSTRUCTION);
    let transcript = &requests[0][1].content;
    assert!(transcript.contains("User: fix the build"));
    assert!(transcript.contains("Tool filesystem-read called with args"));
    assert!(!transcript.contains("file body"));
    // The summary request is torn down once it completes.
    assert!(adapter.tokens()[0].is_cancelled());
}

#[tokio::test]
async fn test_below_threshold_is_untouched() {
    let adapter = ScriptedAdapter::new(Vec::new());
    let compressor = ContextCompressor::new(
        Arc::new(AdapterSummarizer::new(adapter.clone(), "m")),
        CompressorSettings::default(),
    );
    let history = six_rounds();

    let result = compressor.maybe_compress(&history, 7_900, 10_000).await;

    assert!(!result.compressed);
    assert_eq!(result.strategy, CompressionStrategy::Unchanged);
    assert_eq!(result.messages, history);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let adapter = ScriptedAdapter::new(vec![reply("summary")]);
    let compressor = ContextCompressor::new(
        Arc::new(AdapterSummarizer::new(adapter.clone(), "m")),
        CompressorSettings::default(),
    );

    let first = compressor.maybe_compress(&six_rounds(), 8_200, 10_000).await;
    let second = compressor.maybe_compress(&first.messages, 8_200, 10_000).await;

    assert!(!second.compressed);
    assert_eq!(second.messages, first.messages);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_failed_summary_falls_back_to_truncation() {
    let adapter = ScriptedAdapter::new(vec![Script::Open(vec![rejected(429, "quota exceeded")])]);
    let compressor = ContextCompressor::new(
        Arc::new(AdapterSummarizer::new(adapter, "m")),
        CompressorSettings {
            max_tool_result_chars: 100,
            truncation_keep_chars: 10,
            ..CompressorSettings::default()
        },
    );
    let mut history = vec![Message::user("go")];
    history.extend(round(0, &"old output ".repeat(20)));
    history.extend(round(1, "short"));
    history.extend(round(2, "short"));
    history.extend(round(3, &"y".repeat(500)));

    let result = compressor.maybe_compress(&history, 9_000, 10_000).await;

    assert!(result.compressed);
    assert_eq!(result.strategy, CompressionStrategy::Truncated);
    assert_eq!(result.messages.len(), history.len());
    // Roles are never reordered.
    let roles_before: Vec<Role> = history.iter().map(|m| m.role).collect();
    let roles_after: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles_before, roles_after);

    // Older results become placeholders.
    assert_eq!(
        result.messages[2].content,
        "tool result truncated: filesystem-read, 220 chars"
    );
    // Kept rounds stay verbatim unless oversized.
    assert_eq!(result.messages[6].content, "short");
    let sliced = &result.messages[8].content;
    assert!(sliced.starts_with("yyyyyyyyyy\n[... 480 chars truncated ...]\n"));
    assert!(sliced.ends_with("\nyyyyyyyyyy"));
}
