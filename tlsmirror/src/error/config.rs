//! Startup configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Raised while loading or validating `ProxyConfig`. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {path} does not exist")]
    FileNotFound { path: PathBuf },

    /// A field needed by the selected mode is absent
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Key log file could not be opened for appending
    #[error("Cannot open key log file {path}")]
    KeyLogUnavailable { path: PathBuf },

    /// TOML or environment value failed to deserialize
    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },
}
