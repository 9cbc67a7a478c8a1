//! Server commands: `poker-console serve` and `poker-console init-db`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use poker_console::config::ConsoleToml;
use poker_console::console::db::ConsoleDb;
use poker_console::console::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: ConsoleToml,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
    open: bool,
) -> Result<()> {
    let mut server_config = ServerConfig::from_toml(&config);
    if let Some(port) = port {
        server_config.port = port;
    }
    if let Some(db_path) = db_path {
        server_config.db_path = db_path;
    }
    server_config.dev_mode |= dev;
    server_config.open_browser = open && !server_config.dev_mode;

    start_server(server_config).await
}

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    ConsoleDb::new(db_path)?;
    println!("Console database initialized at {}", db_path.display());
    Ok(())
}
