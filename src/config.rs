//! Console configuration, read from `.poker/console.toml`.
//!
//! Layered: file → environment → CLI flags. A missing file yields defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3001
//!
//! [database]
//! path = ".poker/console.db"
//!
//! [paths]
//! captures_dir = "poker_captures"
//! src_dir = "web/src"
//! static_dir = "web/static"
//!
//! [analyzer]
//! program = "/opt/poker/venv/bin/python"
//! script = "core/main.py"
//! module_path = "core"
//!
//! [analyzer.env]
//! ANTHROPIC_API_KEY = "..."
//!
//! [logging]
//! filter = "poker_console=info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = ".poker/console.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a separately served UI.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".poker/console.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Directories served as static mounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Where the analysis process writes screenshots. Mounted at `/poker_captures`.
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
    /// Mounted at `/src`.
    #[serde(default = "default_src_dir")]
    pub src_dir: PathBuf,
    /// Mounted at `/static`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_captures_dir() -> PathBuf {
    PathBuf::from("poker_captures")
}

fn default_src_dir() -> PathBuf {
    PathBuf::from("web/src")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("web/static")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            captures_dir: default_captures_dir(),
            src_dir: default_src_dir(),
            static_dir: default_static_dir(),
        }
    }
}

/// How to launch the external analysis process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSection {
    /// Executable to run (typically a virtualenv's python).
    #[serde(default = "default_program")]
    pub program: String,
    /// Entry script passed as the first argument. Reported back as the launch path.
    #[serde(default = "default_script")]
    pub script: Option<PathBuf>,
    /// Extra arguments after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Exported as PYTHONPATH.
    #[serde(default = "default_module_path")]
    pub module_path: PathBuf,
    /// Working directory; defaults to the server's own.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment on top of the inherited one.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_script() -> Option<PathBuf> {
    Some(PathBuf::from("core/main.py"))
}

fn default_module_path() -> PathBuf {
    PathBuf::from("core")
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            args: Vec::new(),
            module_path: default_module_path(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl AnalyzerSection {
    /// The path reported to callers of `start`: the script if set, else the program.
    pub fn launch_target(&self) -> PathBuf {
        self.script
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.program))
    }

    /// Full argument list: script first, then configured args.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        if let Some(ref script) = self.script {
            args.push(script.to_string_lossy().to_string());
        }
        args.extend(self.args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
    /// Also write logs to a daily-rolling file at this path.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "poker_console=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            file: None,
        }
    }
}

/// The complete console.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsoleToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub analyzer: AnalyzerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ConsoleToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating the parent directory.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize console.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `POKER_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment, in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("POKER_CONSOLE_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "POKER_CONSOLE_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("POKER_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(program) = lookup("POKER_ANALYZER_PROGRAM") {
            self.analyzer.program = program;
        }
        if let Some(dir) = lookup("POKER_CAPTURES_DIR") {
            self.paths.captures_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ConsoleToml::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from(".poker/console.db"));
        assert_eq!(config.paths.captures_dir, PathBuf::from("poker_captures"));
        assert_eq!(config.analyzer.program, "python3");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ConsoleToml::parse("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.analyzer.module_path, PathBuf::from("core"));
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = ConsoleToml::parse(
            r#"
            [server]
            port = 8080

            [analyzer]
            program = "/opt/venv/bin/python"
            args = ["--region", "9,70,330,707"]

            [analyzer.env]
            ANTHROPIC_API_KEY = "sk-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.analyzer.program, "/opt/venv/bin/python");
        assert_eq!(config.analyzer.script, Some(PathBuf::from("core/main.py")));
        assert_eq!(
            config.analyzer.env.get("ANTHROPIC_API_KEY").map(String::as_str),
            Some("sk-test")
        );
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(ConsoleToml::parse("[server\nport = ").is_err());
    }

    #[test]
    fn test_launch_target_prefers_script() {
        let analyzer = AnalyzerSection::default();
        assert_eq!(analyzer.launch_target(), PathBuf::from("core/main.py"));

        let bare = AnalyzerSection {
            program: "/usr/local/bin/analyzer".to_string(),
            script: None,
            ..AnalyzerSection::default()
        };
        assert_eq!(bare.launch_target(), PathBuf::from("/usr/local/bin/analyzer"));
    }

    #[test]
    fn test_command_args_puts_script_first() {
        let analyzer = AnalyzerSection {
            args: vec!["--verbose".to_string()],
            ..AnalyzerSection::default()
        };
        assert_eq!(analyzer.command_args(), vec!["core/main.py", "--verbose"]);
    }

    #[test]
    fn test_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("POKER_CONSOLE_PORT", "4000"),
            ("POKER_DB_PATH", "/tmp/poker.db"),
            ("POKER_ANALYZER_PROGRAM", "/bin/analyzer"),
        ]);
        let mut config = ConsoleToml::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/poker.db"));
        assert_eq!(config.analyzer.program, "/bin/analyzer");
        assert_eq!(config.paths.captures_dir, PathBuf::from("poker_captures"));
    }

    #[test]
    fn test_invalid_port_override_is_rejected() {
        let mut config = ConsoleToml::default();
        let err = config
            .apply_overrides(|k| (k == "POKER_CONSOLE_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/console.toml");
        let mut config = ConsoleToml::default();
        config.server.port = 5050;
        config.save(&path).unwrap();

        let loaded = ConsoleToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 5050);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleToml::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_load_reports_parse_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");
        std::fs::write(&path, "port = [").unwrap();
        let err = ConsoleToml::load(&path).unwrap_err();
        match err {
            ConfigError::Parse { path: p, .. } => assert_eq!(p, path),
            other => panic!("Expected Parse error, got {other:?}"),
        }
    }
}
