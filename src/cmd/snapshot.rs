//! Snapshot inspection and rollback commands.

use anyhow::{Context, Result};
use ferry::config::Config;
use ferry::snapshot::SnapshotManager;
use std::sync::Arc;

/// Rollback works on persisted turns even when capture is disabled.
fn manager(config: &Config) -> Arc<SnapshotManager> {
    config.snapshot_manager().unwrap_or_else(|| {
        let snapshot = &config.ferry_config().toml.snapshot;
        Arc::new(
            SnapshotManager::new(&config.project_dir, &config.data_dir, snapshot.max_file_bytes)
                .with_cache_budget(snapshot.baseline_cache_bytes),
        )
    })
}

pub fn cmd_rollback_points(config: &Config, session: &str) -> Result<()> {
    let points = manager(config)
        .list_rollback_points(session)
        .with_context(|| format!("Failed to list snapshots for session {}", session))?;

    if points.is_empty() {
        println!("No rollback points for session {}.", session);
        return Ok(());
    }

    println!();
    println!("{}", console::style(format!("Rollback points: {}", session)).bold().cyan());
    println!();
    for point in &points {
        println!(
            "  {} {}  {} file(s)",
            console::style(format!("turn {:>3}", point.turn_index)).bold(),
            console::style(point.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            point.file_count
        );
        for path in &point.paths {
            println!("      {}", path);
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_rollback(
    config: &Config,
    session: &str,
    target_turn: u32,
    files: &[String],
) -> Result<()> {
    let manager = manager(config);
    let session_id = session.to_string();
    let selected = (!files.is_empty()).then(|| files.to_vec());

    let report = tokio::task::spawn_blocking(move || {
        manager.rollback(&session_id, target_turn, selected.as_deref())
    })
    .await
    .context("Rollback task panicked")?
    .with_context(|| format!("Failed to roll back session {}", session))?;

    if report.turns.is_empty() && report.failed_turns.is_empty() {
        println!("Nothing to roll back at or after turn {}.", target_turn);
        return Ok(());
    }

    for path in &report.restored {
        println!("  {} {}", console::style("restored").green(), path);
    }
    for path in &report.deleted {
        println!("  {} {}", console::style("deleted ").yellow(), path);
    }
    for failure in &report.failed {
        println!(
            "  {} {}: {}",
            console::style("failed  ").red().bold(),
            failure.path,
            failure.error
        );
    }
    for failure in &report.failed_turns {
        println!(
            "  {} turn {}: {}",
            console::style("skipped ").red().bold(),
            failure.turn_index,
            failure.error
        );
    }
    println!();
    println!("Rolled back {}", report.summary());

    if !report.failed_turns.is_empty() {
        anyhow::bail!("{} turn(s) could not be read", report.failed_turns.len());
    }
    if !report.is_clean() {
        anyhow::bail!("{} file(s) could not be restored", report.failed.len());
    }
    Ok(())
}

pub fn cmd_clear_snapshots(config: &Config, session: &str) -> Result<()> {
    let removed = manager(config)
        .clear(session)
        .with_context(|| format!("Failed to clear snapshots for session {}", session))?;
    println!("Removed {} snapshot(s) for session {}.", removed, session);
    Ok(())
}
