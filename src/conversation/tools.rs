//! Tool executor contract and edit-target extraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool names whose calls mutate files.
pub const EDIT_TOOL_PREFIXES: &[&str] = &[
    "filesystem-edit",
    "filesystem-create",
    "filesystem-write",
    "filesystem-delete",
];

/// Argument keys that may name a single target file.
const PATH_KEYS: &[&str] = &["filePath", "path", "file_path"];

/// Argument keys that may name several target files.
const PATH_LIST_KEYS: &[&str] = &["filePaths", "paths", "file_paths"];

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Executes tool calls requested by the model.
///
/// Implementations must tolerate concurrent `execute` calls; results are
/// reordered to call order by the loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args_json: &str) -> ToolOutput;

    /// Files the call will modify, protected by undo and snapshot capture
    /// before dispatch. Empty for tools that do not edit.
    fn edit_targets(&self, name: &str, args_json: &str) -> Vec<String> {
        default_edit_targets(name, args_json)
    }
}

pub fn is_edit_tool(name: &str) -> bool {
    EDIT_TOOL_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Target paths of an edit-family call, read from its JSON arguments.
pub fn default_edit_targets(name: &str, args_json: &str) -> Vec<String> {
    if !is_edit_tool(name) {
        return Vec::new();
    }
    let Ok(args) = serde_json::from_str::<Value>(args_json) else {
        return Vec::new();
    };

    let mut targets: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if !path.is_empty() && !targets.iter().any(|t| t == path) {
            targets.push(path.to_string());
        }
    };

    for key in PATH_KEYS {
        if let Some(path) = args.get(*key).and_then(Value::as_str) {
            push(path);
        }
    }
    for key in PATH_LIST_KEYS {
        if let Some(list) = args.get(*key).and_then(Value::as_array) {
            for path in list.iter().filter_map(Value::as_str) {
                push(path);
            }
        }
    }
    // Batched edits: {"edits": [{"filePath": ...}, ...]}
    if let Some(edits) = args.get("edits").and_then(Value::as_array) {
        for edit in edits {
            for key in PATH_KEYS {
                if let Some(path) = edit.get(*key).and_then(Value::as_str) {
                    push(path);
                }
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_edit_tools_have_no_targets() {
        assert!(default_edit_targets("filesystem-read", r#"{"filePath":"a.rs"}"#).is_empty());
        assert!(default_edit_targets("terminal-execute", r#"{"command":"rm -rf x"}"#).is_empty());
    }

    #[test]
    fn test_single_and_list_targets() {
        assert_eq!(
            default_edit_targets("filesystem-edit", r#"{"filePath":"src/a.rs","oldString":"x"}"#),
            vec!["src/a.rs"]
        );
        assert_eq!(
            default_edit_targets("filesystem-delete", r#"{"paths":["a","b","a"]}"#),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_batched_edits() {
        let args = r#"{"edits":[{"filePath":"x.rs"},{"path":"y.rs"}]}"#;
        assert_eq!(
            default_edit_targets("filesystem-edit_search", args),
            vec!["x.rs", "y.rs"]
        );
    }

    #[test]
    fn test_malformed_args() {
        assert!(default_edit_targets("filesystem-create", "{not json").is_empty());
    }

    #[test]
    fn test_tool_output_serializes_is_error() {
        let json = serde_json::to_value(ToolOutput::error("boom")).unwrap();
        assert_eq!(json["isError"], true);
    }
}
