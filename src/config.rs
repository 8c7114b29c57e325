use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::compaction::{CompressorSettings, parse_threshold};
use crate::conversation::ConversationSettings;
use crate::ferry_config::FerryConfig;
use crate::retry::RetryPolicy;
use crate::snapshot::SnapshotManager;
use crate::undo::UndoManager;

/// Runtime configuration for ferry.
///
/// Resolves the layered [`FerryConfig`] into the paths and settings the
/// execution core is built from.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    ferry_config: FerryConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, model: Option<String>) -> Result<Self> {
        let ferry_config = FerryConfig::new(project_dir)?.with_cli_args(verbose, model);
        Ok(Self::from_ferry_config(ferry_config))
    }

    pub fn from_ferry_config(ferry_config: FerryConfig) -> Self {
        Self {
            project_dir: ferry_config.project_dir.clone(),
            data_dir: ferry_config.data_dir(),
            log_dir: ferry_config.log_dir(),
            verbose: ferry_config.verbose,
            ferry_config,
        }
    }

    pub fn ferry_config(&self) -> &FerryConfig {
        &self.ferry_config
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).context("Failed to create data directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.ferry_config.toml.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            delay: Duration::from_millis(retry.delay_ms),
            status_clear_delay: Duration::from_millis(retry.status_clear_ms),
        }
    }

    /// Compressor settings; an invalid threshold falls back to the default.
    pub fn compressor_settings(&self) -> CompressorSettings {
        let compaction = &self.ferry_config.toml.compaction;
        CompressorSettings {
            threshold: parse_threshold(&compaction.threshold).unwrap_or_default(),
            max_tool_result_chars: compaction.max_tool_result_chars,
            truncation_keep_chars: compaction.truncation_keep_chars,
        }
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        let conversation = &self.ferry_config.toml.conversation;
        ConversationSettings {
            model: self.ferry_config.model().unwrap_or_default(),
            max_rounds: conversation.max_rounds,
            context_window: conversation.context_window,
            retry: self.retry_policy(),
            compression: self.compressor_settings(),
        }
    }

    /// The snapshot manager, or None when snapshots are disabled.
    pub fn snapshot_manager(&self) -> Option<Arc<SnapshotManager>> {
        let snapshot = &self.ferry_config.toml.snapshot;
        snapshot.enabled.then(|| {
            Arc::new(
                SnapshotManager::new(&self.project_dir, &self.data_dir, snapshot.max_file_bytes)
                    .with_cache_budget(snapshot.baseline_cache_bytes),
            )
        })
    }

    /// The undo manager, with stacks reloaded from disk.
    pub fn undo_manager(&self) -> Result<Arc<UndoManager>> {
        let manager = UndoManager::open(
            &self.project_dir,
            &self.data_dir,
            self.ferry_config.toml.undo.capacity,
        )
        .context("Failed to load undo history")?;
        Ok(Arc::new(manager))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::CompressionThreshold;
    use crate::ferry_config::{CONFIG_FILE, FERRY_DIR};
    use std::fs;
    use tempfile::tempdir;

    fn config_with(toml: &str) -> (tempfile::TempDir, Config) {
        let dir = tempdir().unwrap();
        let ferry_dir = dir.path().join(FERRY_DIR);
        fs::create_dir_all(&ferry_dir).unwrap();
        fs::write(ferry_dir.join(CONFIG_FILE), toml).unwrap();
        let ferry_config = FerryConfig::with_env(dir.path().to_path_buf(), |_| None).unwrap();
        (dir, Config::from_ferry_config(ferry_config))
    }

    #[test]
    fn test_default_paths_live_in_ferry_dir() {
        let (dir, config) = config_with("");
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.data_dir, root.join(".ferry"));
        assert_eq!(config.log_dir, root.join(".ferry/logs"));
        config.ensure_directories().unwrap();
        assert!(config.log_dir.exists());
    }

    #[test]
    fn test_retry_policy_from_file() {
        let (_dir, config) = config_with("[retry]\nmax_attempts = 0\ndelay_ms = 20\n");
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_threshold_uses_default() {
        let (_dir, config) = config_with("[compaction]\nthreshold = \"nope\"\n");
        assert_eq!(
            config.compressor_settings().threshold,
            CompressionThreshold::default()
        );
    }

    #[test]
    fn test_snapshots_can_be_disabled() {
        let (_dir, config) = config_with("[snapshot]\nenabled = false\n");
        assert!(config.snapshot_manager().is_none());
        let (_dir, config) = config_with("");
        assert!(config.snapshot_manager().is_some());
    }

    #[test]
    fn test_conversation_settings() {
        let (_dir, config) =
            config_with("[conversation]\nmodel = \"m\"\nmax_rounds = 4\ncontext_window = 1000\n");
        let settings = config.conversation_settings();
        assert_eq!(settings.model, "m");
        assert_eq!(settings.max_rounds, 4);
        assert_eq!(settings.context_window, 1000);
        assert!(config.undo_manager().unwrap().is_empty("any"));
    }
}
