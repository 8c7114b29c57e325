//! Undo stack commands.

use anyhow::{Context, Result};
use ferry::config::Config;

pub async fn cmd_undo(config: &Config, session: &str, steps: usize) -> Result<()> {
    let manager = config.undo_manager()?;
    let session_id = session.to_string();
    let report = tokio::task::spawn_blocking(move || manager.undo(&session_id, steps))
        .await
        .context("Undo task panicked")?;

    if report.operations.is_empty() {
        println!("Nothing to undo for session {}.", session);
        return Ok(());
    }

    for op in &report.operations {
        println!(
            "{} {} ({} file(s))",
            console::style("Undid").bold(),
            op.tool_kind,
            op.file_paths.len()
        );
    }
    for file in &report.files {
        match &file.error {
            None => println!("  {} {}", console::style("restored").green(), file.path),
            Some(error) => println!(
                "  {} {}: {}",
                console::style("failed  ").red().bold(),
                file.path,
                error
            ),
        }
    }

    if report.failed() > 0 {
        anyhow::bail!("{} file(s) could not be restored", report.failed());
    }
    Ok(())
}

pub fn cmd_undo_history(config: &Config, session: &str) -> Result<()> {
    let history = config.undo_manager()?.history(session);
    if history.is_empty() {
        println!("Undo history for session {} is empty.", session);
        return Ok(());
    }

    println!();
    println!("{}", console::style(format!("Undo history: {}", session)).bold().cyan());
    println!();
    for (i, op) in history.iter().enumerate() {
        println!(
            "  {:>3}. {}  {}",
            i + 1,
            console::style(op.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            op.tool_kind
        );
        for path in &op.file_paths {
            println!("       {}", path);
        }
    }
    println!();
    Ok(())
}
