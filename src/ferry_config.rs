//! Unified configuration for ferry.
//!
//! Settings are read from `.ferry/ferry.toml` in the project directory and
//! layered file → environment → CLI. Every field has a default, so an empty or
//! missing file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [retry]
//! max_attempts = 10
//! delay_ms = 5000
//! status_clear_ms = 1000
//!
//! [conversation]
//! model = "provider-model-id"
//! max_rounds = 100
//! context_window = 128000
//!
//! [compaction]
//! threshold = "80%"
//! max_tool_result_chars = 8000
//! truncation_keep_chars = 2000
//!
//! [snapshot]
//! enabled = true
//! max_file_bytes = 5242880
//! baseline_cache_bytes = 67108864
//!
//! [undo]
//! capacity = 100
//!
//! [storage]
//! data_dir = "/var/tmp/ferry"   # default: <project>/.ferry
//! ```

use crate::compaction::{
    DEFAULT_CONTEXT_WINDOW, DEFAULT_MAX_TOOL_RESULT_CHARS, DEFAULT_TRUNCATION_KEEP_CHARS,
    parse_threshold,
};
use crate::conversation::DEFAULT_MAX_ROUNDS;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_STATUS_CLEAR_DELAY};
use crate::snapshot::DEFAULT_BASELINE_CACHE_BYTES;
use crate::undo::DEFAULT_UNDO_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-project directory holding config and persisted state.
pub const FERRY_DIR: &str = ".ferry";

/// Name of the config file inside [`FERRY_DIR`].
pub const CONFIG_FILE: &str = "ferry.toml";

/// Default cap on file size cached by a snapshot baseline.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Attempts per request, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// How long a retry status stays visible after data resumes
    #[serde(default = "default_status_clear_ms")]
    pub status_clear_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_status_clear_ms() -> u64 {
    DEFAULT_STATUS_CLEAR_DELAY.as_millis() as u64
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            status_clear_ms: default_status_clear_ms(),
        }
    }
}

/// Conversation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSection {
    /// Model id passed to the stream adapter
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Context window of the model, in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            model: None,
            max_rounds: default_max_rounds(),
            context_window: default_context_window(),
        }
    }
}

/// Context compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionSection {
    /// Percentage (e.g., "80%") or absolute token count
    #[serde(default = "default_threshold")]
    pub threshold: String,
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    #[serde(default = "default_truncation_keep_chars")]
    pub truncation_keep_chars: usize,
}

fn default_threshold() -> String {
    "80%".to_string()
}

fn default_max_tool_result_chars() -> usize {
    DEFAULT_MAX_TOOL_RESULT_CHARS
}

fn default_truncation_keep_chars() -> usize {
    DEFAULT_TRUNCATION_KEEP_CHARS
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_tool_result_chars: default_max_tool_result_chars(),
            truncation_keep_chars: default_truncation_keep_chars(),
        }
    }
}

/// Workspace snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files above this size are hashed but not cached at baseline
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Total pre-turn content a baseline keeps in memory
    #[serde(default = "default_baseline_cache_bytes")]
    pub baseline_cache_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_baseline_cache_bytes() -> u64 {
    DEFAULT_BASELINE_CACHE_BYTES
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_bytes: default_max_file_bytes(),
            baseline_cache_bytes: default_baseline_cache_bytes(),
        }
    }
}

/// Undo stack settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSection {
    #[serde(default = "default_undo_capacity")]
    pub capacity: usize,
}

fn default_undo_capacity() -> usize {
    DEFAULT_UNDO_CAPACITY
}

impl Default for UndoSection {
    fn default() -> Self {
        Self {
            capacity: default_undo_capacity(),
        }
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Relative paths resolve against the project directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// The complete ferry.toml configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FerryToml {
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub conversation: ConversationSection,
    #[serde(default)]
    pub compaction: CompactionSection,
    #[serde(default)]
    pub snapshot: SnapshotSection,
    #[serde(default)]
    pub undo: UndoSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl FerryToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ferry.toml")
    }

    /// Load `<ferry_dir>/ferry.toml`, or defaults if it does not exist.
    pub fn load_or_default(ferry_dir: &Path) -> Result<Self> {
        let config_path = ferry_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize ferry.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Unparsable numeric values are ignored and reported as warnings.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(model) = lookup("FERRY_MODEL").filter(|m| !m.trim().is_empty()) {
            self.conversation.model = Some(model);
        }
        if let Some(dir) = lookup("FERRY_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        parse_env(&lookup, "FERRY_MAX_ATTEMPTS", &mut self.retry.max_attempts, &mut warnings);
        parse_env(&lookup, "FERRY_RETRY_DELAY_MS", &mut self.retry.delay_ms, &mut warnings);
        parse_env(
            &lookup,
            "FERRY_CONTEXT_WINDOW",
            &mut self.conversation.context_window,
            &mut warnings,
        );
        warnings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = parse_threshold(&self.compaction.threshold) {
            warnings.push(format!(
                "Invalid compaction.threshold '{}': {}",
                self.compaction.threshold, e
            ));
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; one attempt will still be made".to_string());
        }
        if self.conversation.max_rounds == 0 {
            warnings.push("conversation.max_rounds is 0; one round will still run".to_string());
        }
        if self.conversation.context_window == 0 {
            warnings.push("conversation.context_window is 0; compression is disabled".to_string());
        }
        if self.snapshot.baseline_cache_bytes < self.snapshot.max_file_bytes {
            warnings.push(format!(
                "snapshot.baseline_cache_bytes ({}) is below max_file_bytes ({}); \
                 large edits rely on pre-edit capture",
                self.snapshot.baseline_cache_bytes, self.snapshot.max_file_bytes
            ));
        }
        if self.undo.capacity == 0 {
            warnings.push("undo.capacity is 0; one entry will still be kept".to_string());
        }
        if self.compaction.truncation_keep_chars * 2 >= self.compaction.max_tool_result_chars {
            warnings.push(format!(
                "compaction.truncation_keep_chars ({}) keeps at least max_tool_result_chars ({}); \
                 oversized results will not shrink",
                self.compaction.truncation_keep_chars, self.compaction.max_tool_result_chars
            ));
        }

        warnings
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, target: &mut T, warnings: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warnings.push(format!("Ignoring {}='{}': not a valid number", key, raw)),
    }
}

/// Unified configuration that combines FerryToml with runtime settings.
///
/// Settings are merged from:
/// 1. ferry.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct FerryConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .ferry directory
    pub ferry_dir: PathBuf,
    /// Parsed and env-overridden configuration
    pub toml: FerryToml,
    /// Warnings raised while applying environment overrides
    pub env_warnings: Vec<String>,
    /// CLI override: verbose logging
    pub verbose: bool,
    /// CLI override: model
    pub cli_model: Option<String>,
}

impl FerryConfig {
    /// Load configuration for a project, applying process environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_env(project_dir, |key| std::env::var(key).ok())
    }

    /// Load configuration with environment values supplied by `lookup`.
    pub fn with_env<F>(project_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let ferry_dir = project_dir.join(FERRY_DIR);
        let mut toml = FerryToml::load_or_default(&ferry_dir)?;
        let env_warnings = toml.apply_env(lookup);

        Ok(Self {
            project_dir,
            ferry_dir,
            toml,
            env_warnings,
            verbose: false,
            cli_model: None,
        })
    }

    /// Apply CLI overrides.
    pub fn with_cli_args(mut self, verbose: bool, model: Option<String>) -> Self {
        self.verbose = verbose;
        self.cli_model = model;
        self
    }

    /// Model id (CLI → env → file).
    pub fn model(&self) -> Option<String> {
        self.cli_model
            .clone()
            .or_else(|| self.toml.conversation.model.clone())
    }

    /// Get path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.ferry_dir.join(CONFIG_FILE)
    }

    /// Directory for persisted state (env → file → `.ferry`).
    pub fn data_dir(&self) -> PathBuf {
        match &self.toml.storage.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_dir.join(dir),
            None => self.ferry_dir.clone(),
        }
    }

    /// Get path to log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}
