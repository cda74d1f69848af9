//! Proxy-level configuration types.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use super::defaults::*;
use super::{MitmConfig, TransparentConfig};
use crate::error::{ConfigError, Result};
use crate::hijack::TargetAddr;
use crate::tls::presets;

/// Hijacking strategy applied to every tunnel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HijackMode {
    /// Relay the raw tunnel unmodified
    Passthrough,
    /// Terminate TLS locally and mirror the client's handshake upstream
    Mitm,
    /// Like `mitm`, for raw TLS connections towards a fixed target
    Transparent,
}

/// tlsmirror configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProxyConfig {
    /// The address to accept CONNECT requests on (default = 0.0.0.0:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Hijacking strategy (default = mitm)
    #[serde(default = "default_mode")]
    pub mode: HijackMode,
    /// Upstream dial timeout in seconds, 0 disables the bound (default = 5)
    #[serde(default = "default_dial_timeout_s")]
    pub dial_timeout_s: u64,
    /// Deadline for each handshake stage in seconds (default = 30)
    #[serde(default = "default_handshake_timeout_s")]
    pub handshake_timeout_s: u64,
    /// Interception configuration
    #[serde(default)]
    pub mitm: MitmConfig,
    /// Fixed target for the transparent listener
    #[serde(default)]
    pub transparent: TransparentConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl ProxyConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_s)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_s)
    }

    /// Destination of every connection in transparent mode.
    pub fn transparent_target(&self) -> Result<TargetAddr> {
        let target = self
            .transparent
            .target
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "transparent.target".to_string(),
            })?;
        TargetAddr::parse(target).map_err(|e| {
            ConfigError::InvalidValue {
                field: "transparent.target".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handshake_timeout_s".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        if self.dial_timeout_s == 0 {
            warn!("dial_timeout_s is 0, upstream dials are not bounded");
        }

        if self.mode == HijackMode::Transparent {
            self.transparent_target()?;
        }

        if matches!(self.mode, HijackMode::Mitm | HijackMode::Transparent) {
            if self.mitm.ca_certificate_file.is_none() {
                return Err(ConfigError::MissingField {
                    field: "mitm.ca_certificate_file".to_string(),
                }
                .into());
            }
            if self.mitm.ca_key_file.is_none() {
                return Err(ConfigError::MissingField {
                    field: "mitm.ca_key_file".to_string(),
                }
                .into());
            }
            if let Some(name) = &self.mitm.fingerprint_preset {
                if presets::preset(name).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: "mitm.fingerprint_preset".to_string(),
                        reason: format!(
                            "unknown preset '{}', expected one of {:?}",
                            name,
                            presets::preset_names()
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LogConfig {
    /// The log level to use (default = info)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
