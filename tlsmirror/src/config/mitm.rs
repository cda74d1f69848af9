//! Interception configuration types.

use serde::Deserialize;
use std::path::PathBuf;

use super::defaults::*;

/// MITM configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MitmConfig {
    /// CA certificate used to sign leaf certificates (PEM)
    pub ca_certificate_file: Option<PathBuf>,
    /// Private key of the CA (PEM)
    pub ca_key_file: Option<PathBuf>,
    /// NSS key-log file shared by both TLS legs
    pub key_log_file: Option<PathBuf>,
    /// Dial upstream without certificate verification when no name is known (default = false)
    #[serde(default = "default_false_fn")]
    pub allow_insecure: bool,
    /// Additional trusted roots as PEM strings
    #[serde(default = "default_trusted_certificates")]
    pub trusted_certificates: Vec<String>,
    /// Additional trusted root files (PEM)
    #[serde(default = "default_trusted_certificate_paths")]
    pub trusted_certificate_paths: Vec<PathBuf>,
    /// Named template used instead of the captured fingerprint
    pub fingerprint_preset: Option<String>,
    /// ALPN offered to clients when the upstream negotiated none
    #[serde(default = "default_local_alpn_protocols")]
    pub local_alpn_protocols: Vec<String>,
    /// Client certificate presented to one upstream host
    #[serde(default)]
    pub mutual_tls: Option<MutualTlsConfig>,
}

impl Default for MitmConfig {
    fn default() -> Self {
        Self {
            ca_certificate_file: None,
            ca_key_file: None,
            key_log_file: None,
            allow_insecure: default_false_fn(),
            trusted_certificates: default_trusted_certificates(),
            trusted_certificate_paths: default_trusted_certificate_paths(),
            fingerprint_preset: None,
            local_alpn_protocols: default_local_alpn_protocols(),
            mutual_tls: None,
        }
    }
}

impl MitmConfig {
    /// Local ALPN offers as raw protocol names.
    pub fn local_alpn(&self) -> Vec<Vec<u8>> {
        self.local_alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }
}

/// Mutual TLS configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MutualTlsConfig {
    /// Upstream server name the certificate is presented to
    pub host: String,
    /// Client certificate (PEM)
    pub certificate_file: PathBuf,
    /// Client certificate private key (PEM)
    pub key_file: PathBuf,
}
