//! Typed error hierarchy for the poker console.
//!
//! Two top-level enums cover the two subsystems:
//! - `ConsoleError`: accounts, history persistence, and analysis-process lifecycle
//! - `ConfigError`: loading `console.toml`

use thiserror::Error;

/// Errors from the console API, persistence, and supervisor subsystems.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Email {email} is already registered")]
    EmailTaken { email: String },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Analysis process is already running")]
    AlreadyRunning,

    #[error("Analysis process is not running")]
    NotRunning,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from reading or parsing the console configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
}
