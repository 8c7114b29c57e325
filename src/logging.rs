//! Tracing setup for the `ferry` binary.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "FERRY_LOG";

/// Prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "ferry.log";

/// Directive used when `FERRY_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "ferry=debug" } else { "ferry=info" }
}

/// Install the global subscriber.
///
/// Warnings go to stderr (everything when `verbose`); with a `log_dir`, all
/// events passing the filter are also written to a daily-rolling file, as JSON
/// lines when `json` is set. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(log_dir: Option<&Path>, verbose: bool, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);

    let (writer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json_file = writer
        .clone()
        .filter(|_| json)
        .map(|w| fmt::layer().json().with_writer(w).with_ansi(false));
    let plain_file = writer
        .filter(|_| !json)
        .map(|w| fmt::layer().with_writer(w).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json_file)
        .with(plain_file)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
