//! Configuration commands: `poker-console config`.

use anyhow::{Context, Result};
use std::path::Path;

use poker_console::config::ConsoleToml;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    effective: &ConsoleToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Poker Console Configuration");
            println!("===========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(effective).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists. Use --force to overwrite.",
                    config_path.display()
                );
            }
            ConsoleToml::default().save(config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }
    Ok(())
}
