//! Configuration module for the lpframe server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocols::frame::handler::DEFAULT_READ_BUFFER_SIZE;

/// Command-line arguments for the frame server
#[derive(Parser, Debug)]
#[command(name = "lpframe")]
#[command(author = "lpframe authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP server for 16-bit length-prefixed frames", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:50000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum bytes taken from a socket per read
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum bytes taken from a socket per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Idle timeout in seconds (0 = never)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            idle_timeout: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:50000".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 50000)),
            workers: None,
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }

        let read_buffer_size = cli
            .read_buffer_size
            .unwrap_or(toml_config.connection.read_buffer_size);
        if read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be at least 1"));
        }

        let workers = cli.workers.or(toml_config.server.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }

        let idle_timeout = match cli.idle_timeout.unwrap_or(toml_config.connection.idle_timeout) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Config {
            listen,
            workers,
            max_connections,
            read_buffer_size,
            idle_timeout,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("lpframe").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:50000");
        assert_eq!(config.server.max_connections, 10000);
        assert_eq!(config.connection.read_buffer_size, 4096);
        assert_eq!(config.connection.idle_timeout, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:6000"
            workers = 4
            max_connections = 64

            [connection]
            read_buffer_size = 4
            idle_timeout = 300

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:6000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.connection.read_buffer_size, 4);
        assert_eq!(config.connection.idle_timeout, 300);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_merge_defaults() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:50000".parse().unwrap());
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:6000"

            [connection]
            idle_timeout = 300

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["--listen", "127.0.0.1:7000", "-t", "5", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_toml_used_when_cli_absent() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [connection]
            idle_timeout = 30

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_explicit_cli_log_level_beats_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["--log-level", "info"]), toml_config).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::merge(cli(&["--listen", "not-an-address"]), TomlConfig::default()),
            Err(ConfigError::InvalidListen(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["--read-buffer-size", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["--max-connections", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["--workers", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_args(cli(&["--config", "/nonexistent/lpframe.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
        assert!(err.to_string().contains("/nonexistent/lpframe.toml"));
    }
}
