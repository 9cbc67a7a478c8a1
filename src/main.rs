use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use poker_console::config::{ConsoleToml, DEFAULT_CONFIG_PATH};

mod cmd;

#[derive(Parser)]
#[command(name = "poker-console")]
#[command(version, about = "Operator console for the poker analysis assistant")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to console.toml
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the console server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,

        /// Open the dashboard in a browser once listening
        #[arg(long)]
        open: bool,
    },
    /// Create the database and its tables, then exit
    InitDb {
        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default console.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = ConsoleToml::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.apply_env_overrides()?;

    let _log_guard = poker_console::logging::init_tracing(&config.logging, cli.verbose);

    match &cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            open,
        } => {
            cmd::cmd_serve(config, *port, db_path.clone(), *dev, *open).await?;
        }
        Commands::InitDb { db_path } => {
            let path = db_path.clone().unwrap_or(config.database.path);
            cmd::cmd_init_db(&path)?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&cli.config, &config, command.clone())?;
        }
    }

    Ok(())
}
