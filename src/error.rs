//! Error types for configuration loading and responder startup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop a responder before it starts serving.
///
/// Everything that happens once a responder is serving is logged and skipped
/// instead of being returned.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to resolve listen address '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid packet network '{network}': {reason}")]
    InvalidNetwork { network: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}
