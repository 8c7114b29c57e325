//! Configuration view and validation commands - `ferry config`.

use anyhow::{Context, Result};
use ferry::ferry_config::{CONFIG_FILE, FERRY_DIR, FerryConfig, FerryToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let ferry_dir = project_dir.join(FERRY_DIR);
    let config_path = ferry_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Ferry Configuration");
            println!("===================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No ferry.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include env overrides.
            let config = FerryConfig::new(project_dir.to_path_buf())?;
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
            println!("data_dir = \"{}\"", config.data_dir().display());
            for warning in &config.env_warnings {
                println!("{} {}", console::style("warning:").yellow(), warning);
            }
            if !config_path.exists() {
                println!();
                println!("Run 'ferry config init' to create a ferry.toml file.");
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No ferry.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = FerryToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("ferry.toml already exists at {}", config_path.display());
                return Ok(());
            }

            std::fs::create_dir_all(&ferry_dir).context("Failed to create .ferry directory")?;
            FerryToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
