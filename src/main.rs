use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about = "Execution core for a tool-using coding agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the turns of a session that can be rolled back
    RollbackPoints {
        #[arg(short, long)]
        session: String,
    },
    /// Restore the workspace to its state before a turn
    Rollback {
        #[arg(short, long)]
        session: String,

        /// Oldest turn to undo; it and every later turn are rolled back
        #[arg(long)]
        to: u32,

        /// Restrict the rollback to these paths (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Revert the most recent file-editing tool calls
    Undo {
        #[arg(short, long)]
        session: String,

        #[arg(long, default_value = "1")]
        steps: usize,
    },
    /// Show the undo stack of a session, newest first
    UndoHistory {
        #[arg(short, long)]
        session: String,
    },
    /// Delete every persisted snapshot of a session
    ClearSnapshots {
        #[arg(short, long)]
        session: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default ferry.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Config commands must work even when ferry.toml is broken.
    if let Commands::Config { command } = &cli.command {
        let _guard = ferry::logging::init(None, cli.verbose, cli.json_logs)?;
        return cmd::cmd_config(&project_dir, command.clone());
    }

    let config = ferry::config::Config::new(project_dir, cli.verbose, None)?;
    let _guard = ferry::logging::init(Some(&config.log_dir), cli.verbose, cli.json_logs)?;
    for warning in &config.ferry_config().env_warnings {
        tracing::warn!("{}", warning);
    }

    match &cli.command {
        Commands::RollbackPoints { session } => cmd::cmd_rollback_points(&config, session)?,
        Commands::Rollback { session, to, files } => {
            cmd::cmd_rollback(&config, session, *to, files).await?
        }
        Commands::Undo { session, steps } => cmd::cmd_undo(&config, session, *steps).await?,
        Commands::UndoHistory { session } => cmd::cmd_undo_history(&config, session)?,
        Commands::ClearSnapshots { session } => cmd::cmd_clear_snapshots(&config, session)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
