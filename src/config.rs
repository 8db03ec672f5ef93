//! Configuration for the gridmux server and clients
//!
//! Precedence: CLI > environment > config file > defaults. The config file
//! is TOML, by default at `$XDG_CONFIG_HOME/gridmux/config.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::backend::LocalConfig;
use crate::core::{Palette, Rgb};
use crate::pty::SpawnCommand;
use crate::shm;

/// CLI arguments for the server
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gridmux-server")]
#[command(version)]
#[command(about = "Run a terminal and publish its grid through shared memory", long_about = None)]
pub struct CliArgs {
    /// Path to custom config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Control socket path
    #[arg(short, long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Shared memory region name (must start with '/')
    #[arg(short = 'm', long = "shm", value_name = "NAME")]
    pub shm_name: Option<String>,

    /// Initial columns
    #[arg(short, long, value_name = "COLS")]
    pub cols: Option<usize>,

    /// Initial rows
    #[arg(short, long, value_name = "ROWS")]
    pub rows: Option<usize>,

    /// Run this command through `sh -c` instead of the shell
    #[arg(short, long, value_name = "COMMAND")]
    pub exec: Option<String>,

    /// Number of scrollback lines
    #[arg(long, value_name = "LINES")]
    pub scrollback: Option<usize>,
}

/// Default colors for cells with no explicit color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub foreground: String,
    pub background: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            foreground: Palette::DEFAULT_FG.to_string(),
            background: Palette::DEFAULT_BG.to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    pub shm_name: String,
    pub cols: usize,
    pub rows: usize,
    pub shell: String,
    /// Command run via `sh -c` in place of the shell
    pub exec: Option<String>,
    pub scrollback_lines: usize,
    /// Publish interval in milliseconds
    pub tick_ms: u64,
    pub palette: PaletteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
            shm_name: "/gridmux-grid-0".to_string(),
            cols: 80,
            rows: 24,
            shell: env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            exec: None,
            scrollback_lines: 10_000,
            tick_ms: 20,
            palette: PaletteConfig::default(),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

const MAX_DIMENSION: usize = shm::MAX_DIMENSION;
const MAX_SCROLLBACK: usize = 10_000_000;

impl Config {
    /// Load configuration with full precedence
    pub fn load_with_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let config_path = args.config.clone().or_else(Self::default_config_path);
        if let Some(path) = &config_path {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(file_config) => config = file_config,
                    // An explicitly requested file must load
                    Err(e) if args.config.is_some() => return Err(e),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring config file"),
                }
            } else if args.config.is_some() {
                return Err(ConfigError {
                    message: format!("Config file {} does not exist", path.display()),
                    field: None,
                });
            }
        }

        config.apply_env(|key| env::var(key).ok())?;
        config.apply_cli_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file: {}", e),
            field: None,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file: {}", e),
            field: None,
        })
    }

    /// Apply `GRIDMUX_*` variables looked up through `var`
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = var("GRIDMUX_SOCKET") {
            self.socket_path = PathBuf::from(val);
        }
        if let Some(val) = var("GRIDMUX_SHM") {
            self.shm_name = val;
        }
        if let Some(val) = var("GRIDMUX_SHELL") {
            self.shell = val;
        }
        if let Some(val) = var("GRIDMUX_SCROLLBACK") {
            self.scrollback_lines = val
                .parse()
                .map_err(|_| ConfigError::field("GRIDMUX_SCROLLBACK", format!("'{val}' is not a line count")))?;
        }
        Ok(())
    }

    fn apply_cli_args(&mut self, args: &CliArgs) {
        if let Some(socket) = &args.socket {
            self.socket_path = socket.clone();
        }
        if let Some(name) = &args.shm_name {
            self.shm_name = name.clone();
        }
        if let Some(cols) = args.cols {
            self.cols = cols;
        }
        if let Some(rows) = args.rows {
            self.rows = rows;
        }
        if let Some(exec) = &args.exec {
            self.exec = Some(exec.clone());
        }
        if let Some(scrollback) = args.scrollback {
            self.scrollback_lines = scrollback;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=MAX_DIMENSION).contains(&self.cols) {
            return Err(ConfigError::field("cols", format!("must be between 2 and {MAX_DIMENSION}")));
        }
        if !(1..=MAX_DIMENSION).contains(&self.rows) {
            return Err(ConfigError::field("rows", format!("must be between 1 and {MAX_DIMENSION}")));
        }
        if !(1..=1000).contains(&self.tick_ms) {
            return Err(ConfigError::field("tick_ms", "must be between 1 and 1000"));
        }
        if shm::validate_name(&self.shm_name).is_err() {
            return Err(ConfigError::field(
                "shm_name",
                format!("'{}' must start with '/' and contain no other '/'", self.shm_name),
            ));
        }
        if self.scrollback_lines > MAX_SCROLLBACK {
            return Err(ConfigError::field("scrollback_lines", "must be at most 10,000,000"));
        }
        if self.shell.is_empty() {
            return Err(ConfigError::field("shell", "must not be empty"));
        }
        for (field, color) in [
            ("palette.foreground", &self.palette.foreground),
            ("palette.background", &self.palette.background),
        ] {
            if Rgb::parse_hex(color).is_none() {
                return Err(ConfigError::field(
                    field,
                    format!("Invalid hex color '{}'. Expected format: #RRGGBB", color),
                ));
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gridmux").join("config.toml"))
    }

    /// `$XDG_RUNTIME_DIR/gridmux.sock`, else `/tmp/gridmux.sock`
    pub fn default_socket_path() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("gridmux.sock")
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn palette(&self) -> Palette {
        let defaults = Palette::default();
        Palette {
            foreground: Rgb::parse_hex(&self.palette.foreground).unwrap_or(defaults.foreground),
            background: Rgb::parse_hex(&self.palette.background).unwrap_or(defaults.background),
        }
    }

    pub fn spawn_command(&self) -> SpawnCommand {
        match &self.exec {
            Some(command) => SpawnCommand::command_line(command.clone()),
            None => SpawnCommand::shell(self.shell.clone()),
        }
    }

    pub fn local_config(&self) -> LocalConfig {
        LocalConfig {
            cols: self.cols,
            rows: self.rows,
            scrollback_lines: self.scrollback_lines,
            palette: self.palette(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!((config.cols, config.rows), (80, 24));
        assert_eq!(config.shm_name, "/gridmux-grid-0");
        assert_eq!(config.scrollback_lines, 10_000);
        assert_eq!(config.tick(), Duration::from_millis(20));
        assert!(config.socket_path.ends_with("gridmux.sock"));
        assert!(config.validate().is_ok());
        assert_eq!(config.palette(), Palette::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.cols = 1;
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("cols"));
        config.cols = 80;

        config.rows = 5000;
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("rows"));
        config.rows = 24;

        config.shm_name = "no-slash".to_string();
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("shm_name"));
        config.shm_name = "/a/b".to_string();
        assert!(config.validate().is_err());
        config.shm_name = "/ok".to_string();

        config.tick_ms = 0;
        assert_eq!(config.validate().unwrap_err().field.as_deref(), Some("tick_ms"));
        config.tick_ms = 20;

        config.palette.foreground = "invalid".to_string();
        assert_eq!(
            config.validate().unwrap_err().field.as_deref(),
            Some("palette.foreground")
        );
    }

    #[test]
    fn test_config_toml_parsing() {
        let toml_str = r##"
            shm_name = "/custom"
            cols = 120
            tick_ms = 10

            [palette]
            background = "#101010"
        "##;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shm_name, "/custom");
        assert_eq!(config.cols, 120);
        assert_eq!(config.rows, 24);
        assert_eq!(config.tick_ms, 10);
        assert_eq!(config.palette().background, Rgb::new(0x10, 0x10, 0x10));
        assert_eq!(config.palette().foreground, Palette::DEFAULT_FG);
    }

    #[test]
    fn test_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = 100\nrows = 40\nshm_name = \"/from-file\"\n").unwrap();

        let mut config = Config::load_from_file(&path).unwrap();
        let env: HashMap<&str, &str> = [("GRIDMUX_SHM", "/from-env"), ("GRIDMUX_SCROLLBACK", "42")].into();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        config.apply_cli_args(&CliArgs {
            rows: Some(50),
            ..CliArgs::default()
        });

        assert_eq!(config.cols, 100);
        assert_eq!(config.rows, 50);
        assert_eq!(config.shm_name, "/from-env");
        assert_eq!(config.scrollback_lines, 42);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "GRIDMUX_SCROLLBACK").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("GRIDMUX_SCROLLBACK"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let args = CliArgs {
            config: Some(PathBuf::from("/nonexistent/gridmux.toml")),
            ..CliArgs::default()
        };
        assert!(Config::load_with_args(&args).is_err());
    }

    #[test]
    fn test_spawn_command() {
        let mut config = Config::default();
        config.shell = "/bin/bash".to_string();
        assert_eq!(config.spawn_command(), SpawnCommand::shell("/bin/bash"));
        config.exec = Some("top".to_string());
        assert_eq!(config.spawn_command(), SpawnCommand::command_line("top"));
    }
}
