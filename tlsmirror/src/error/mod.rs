//! Error handling for the tlsmirror proxy.
//!
//! This module provides a hierarchical error system using `thiserror` that
//! covers configuration, certificate issuance, networking and the
//! per-connection interception pipeline. Startup errors are fatal, everything
//! else is scoped to one connection.

mod certificate;
mod config;
mod hijack;
mod network;

pub use certificate::CertificateError;
pub use config::ConfigError;
pub use hijack::HijackError;
pub use network::NetworkError;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tlsmirror.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Certificate and TLS material errors
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Interception pipeline errors
    #[error("Hijack error: {0}")]
    Hijack(#[from] HijackError),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// I/O operations errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic system errors for unrecoverable conditions
    #[error("System error: {message}")]
    System { message: String },
}

// BoringSSL error conversion
impl From<boring::error::ErrorStack> for MirrorError {
    fn from(err: boring::error::ErrorStack) -> Self {
        MirrorError::Certificate(CertificateError::Ssl {
            message: err.to_string(),
        })
    }
}

impl From<tokio::task::JoinError> for MirrorError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            MirrorError::system("Task was cancelled")
        } else if err.is_panic() {
            MirrorError::system("Task panicked")
        } else {
            MirrorError::system(format!("Task failed: {err}"))
        }
    }
}

impl From<tracing::subscriber::SetGlobalDefaultError> for MirrorError {
    fn from(err: tracing::subscriber::SetGlobalDefaultError) -> Self {
        MirrorError::system(format!("Failed to set global tracing subscriber: {err}"))
    }
}

impl From<figment::Error> for MirrorError {
    fn from(err: figment::Error) -> Self {
        if err.path.is_empty() {
            return MirrorError::Config(ConfigError::ParseError {
                message: err.to_string(),
            });
        }

        let field = PathBuf::from(err.path.join("."))
            .to_string_lossy()
            .to_string();
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: field.clone(),
            reason: reason.to_string(),
        };

        let config_error = match &err.kind {
            figment::error::Kind::MissingField(name) => ConfigError::MissingField {
                field: name.to_string(),
            },
            figment::error::Kind::InvalidType(_, _) => invalid("invalid type"),
            figment::error::Kind::InvalidValue(_, _) => invalid("invalid value"),
            figment::error::Kind::InvalidLength(_, _) => invalid("invalid length"),
            figment::error::Kind::UnknownVariant(_, _) => invalid("unknown variant"),
            figment::error::Kind::UnknownField(..) => invalid("unknown field"),
            figment::error::Kind::DuplicateField(_) => invalid("duplicate field"),
            figment::error::Kind::UnsupportedKey(..) => invalid("unsupported key"),
            figment::error::Kind::Unsupported(_) => invalid("unsupported value"),
            figment::error::Kind::ISizeOutOfRange(_) | figment::error::Kind::USizeOutOfRange(_) => {
                invalid("integer out of range")
            }
            figment::error::Kind::Message(_) => ConfigError::ParseError {
                message: err.to_string(),
            },
        };
        MirrorError::Config(config_error)
    }
}

impl MirrorError {
    /// Creates a new MirrorError with a system message.
    pub fn system(message: impl Into<String>) -> Self {
        MirrorError::System {
            message: message.into(),
        }
    }

    /// Creates a MirrorError for a general configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        MirrorError::Config(ConfigError::ParseError {
            message: message.into(),
        })
    }

    /// Creates a MirrorError for a malformed ClientHello.
    pub fn protocol(reason: impl Into<String>) -> Self {
        MirrorError::Hijack(HijackError::Protocol {
            reason: reason.into(),
        })
    }

    /// Creates a MirrorError for a handshake stage that exceeded its deadline.
    pub fn timeout(stage: &'static str) -> Self {
        MirrorError::Hijack(HijackError::Timeout { stage })
    }

    /// Returns the interception error, if this is one.
    pub fn as_hijack(&self) -> Option<&HijackError> {
        match self {
            MirrorError::Hijack(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for tlsmirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
