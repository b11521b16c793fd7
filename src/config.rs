//! Configuration module for benchserver.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Command-line arguments for the benchmark server
#[derive(Parser, Debug)]
#[command(name = "benchserver")]
#[command(author = "benchserver authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal target server for load generators", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., :8080 or 127.0.0.1:9000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Server type to bring up: http, tcp, udp, or a packet network such as ip4:icmp
    #[arg(short = 't', long = "type")]
    pub server_type: Option<String>,

    /// Size of the HTTP/TCP response in bytes
    #[arg(short = 's', long)]
    pub size: Option<usize>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Milliseconds between throughput reports
    #[arg(long)]
    pub report_interval_ms: Option<u64>,

    /// What a TCP connection does after a failed read or write
    #[arg(long, value_enum)]
    pub on_io_error: Option<IoErrorPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Server type name
    #[serde(rename = "type", default = "default_server_type")]
    pub server_type: String,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            server_type: default_server_type(),
            workers: None,
        }
    }
}

/// Response payload configuration
#[derive(Debug, Deserialize)]
pub struct ResponseConfig {
    /// Filler payload length in bytes
    #[serde(default = "default_response_size")]
    pub size: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            size: default_response_size(),
        }
    }
}

/// Periodic reporter configuration
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval_ms(),
        }
    }
}

/// Per-connection behavior
#[derive(Debug, Deserialize, Default)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub on_io_error: IoErrorPolicy,
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
    ":8080".to_string()
}

fn default_server_type() -> String {
    "http".to_string()
}

fn default_response_size() -> usize {
    1024
}

fn default_report_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which responder to bring up.
///
/// Anything that is not exactly `http`, `tcp` or `udp` names a raw packet
/// network (e.g. `ip4:icmp`) and is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerType {
    Http,
    Tcp,
    Udp,
    Raw(String),
}

impl From<&str> for ServerType {
    fn from(name: &str) -> Self {
        match name {
            "http" => ServerType::Http,
            "tcp" => ServerType::Tcp,
            "udp" => ServerType::Udp,
            network => ServerType::Raw(network.to_string()),
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerType::Http => f.write_str("http"),
            ServerType::Tcp => f.write_str("tcp"),
            ServerType::Udp => f.write_str("udp"),
            ServerType::Raw(network) => f.write_str(network),
        }
    }
}

/// What a TCP connection loop does when a read or write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IoErrorPolicy {
    /// End the connection loop and drop the connection.
    #[default]
    Close,
    /// Skip the failed operation and loop again, even if the peer is gone.
    Retry,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub server_type: ServerType,
    pub response_size: usize,
    pub report_interval: Duration,
    pub on_io_error: IoErrorPolicy,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
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

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server_type = cli
            .server_type
            .unwrap_or(toml_config.server.server_type);
        let interval_ms = cli
            .report_interval_ms
            .unwrap_or(toml_config.report.interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "report interval must be greater than zero".to_string(),
            ));
        }
        let workers = cli.workers.or(toml_config.server.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid(
                "worker count must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            server_type: ServerType::from(server_type.as_str()),
            response_size: cli.size.unwrap_or(toml_config.response.size),
            report_interval: Duration::from_millis(interval_ms),
            on_io_error: cli
                .on_io_error
                .unwrap_or(toml_config.connection.on_io_error),
            workers,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            server_type: ServerType::Http,
            response_size: default_response_size(),
            report_interval: Duration::from_millis(default_report_interval_ms()),
            on_io_error: IoErrorPolicy::Close,
            workers: None,
            log_level: default_log_level(),
        }
    }
}
