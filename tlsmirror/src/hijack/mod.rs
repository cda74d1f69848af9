//! Hijacking strategies.
//!
//! A hijacker turns one intercepted tunnel into two relayable plaintext legs.
//! For CONNECT tunnels implementations must have written the tunnel-established
//! response to the client before returning a pair. Transparent connections
//! get no response.

mod mitm;
mod passthrough;
pub mod prefixed;
pub mod tee;

pub use mitm::{MitmHijacker, MitmSettings, MitmState};
pub use passthrough::PassthroughHijacker;
pub use prefixed::PrefixedStream;
pub use tee::{TeePrimary, TeeShadow, TeeStream};

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::cert_generator::CertificateGenerator;
use crate::certificates::{ClientCredentials, TrustStore};
use crate::config::{HijackMode, ProxyConfig};
use crate::dialer::Dialer;
use crate::error::{ConfigError, HijackError, MirrorError, NetworkError, Result};
use crate::tls::KeyLogWriter;

/// Any bidirectional byte stream a leg can be made of.
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

pub type BoxedStream = Box<dyn AsyncIo>;

/// Destination named by the CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`, with IPv6 literals in brackets.
    pub fn parse(authority: &str) -> Result<Self> {
        let invalid = || NetworkError::InvalidAddress {
            address: authority.to_string(),
        };

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, port) = rest.split_once(']').ok_or_else(invalid)?;
            if host.parse::<std::net::Ipv6Addr>().is_err() {
                return Err(invalid().into());
            }
            (host, port.strip_prefix(':').ok_or_else(invalid)?)
        } else {
            let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
            // Unbracketed IPv6 literals are ambiguous
            if host.contains(':') {
                return Err(invalid().into());
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid().into());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    pub fn is_ip_literal(&self) -> bool {
        self.ip().is_some()
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// The two plaintext legs handed to the relay loop.
pub struct ConnectionPair {
    pub client: BoxedStream,
    pub server: BoxedStream,
}

/// Produces relayable legs for one intercepted tunnel.
///
/// `async_trait` is used to allow usage with dynamic dispatch.
#[async_trait]
pub trait Hijacker: Send + Sync {
    async fn get_conns(&self, target: &TargetAddr, client: BoxedStream) -> Result<ConnectionPair>;
}

/// ALPN offered on the local handshake.
///
/// The upstream's choice wins outright; without one the configured list stays.
pub fn relay_alpn(configured: &[Vec<u8>], negotiated: Option<&[u8]>) -> Vec<Vec<u8>> {
    match negotiated {
        Some(proto) if !proto.is_empty() => vec![proto.to_vec()],
        _ => configured.to_vec(),
    }
}

/// Classifies any dial failure as `UpstreamDial`, whichever dialer produced it.
pub(crate) fn dial_error(address: &str, err: MirrorError) -> MirrorError {
    match err {
        MirrorError::Hijack(HijackError::UpstreamDial { .. }) => err,
        other => HijackError::UpstreamDial {
            address: address.to_string(),
            reason: other.to_string(),
        }
        .into(),
    }
}

/// Builds the hijacker for the configured mode, loading all startup material.
pub fn build_hijacker(config: &ProxyConfig, dialer: Arc<dyn Dialer>) -> Result<Arc<dyn Hijacker>> {
    match config.mode {
        HijackMode::Passthrough => {
            info!("Hijack mode: passthrough");
            Ok(Arc::new(PassthroughHijacker::new(dialer)))
        }
        HijackMode::Mitm | HijackMode::Transparent => {
            let mitm = &config.mitm;
            let transparent = config.mode == HijackMode::Transparent;
            let missing = |field: &str| ConfigError::MissingField {
                field: field.to_string(),
            };
            let ca_certificate_file = mitm
                .ca_certificate_file
                .as_deref()
                .ok_or_else(|| missing("mitm.ca_certificate_file"))?;
            let ca_key_file = mitm
                .ca_key_file
                .as_deref()
                .ok_or_else(|| missing("mitm.ca_key_file"))?;

            let generator = CertificateGenerator::from_files(ca_certificate_file, ca_key_file)?;
            let trust_store = TrustStore::load(
                &mitm.trusted_certificate_paths,
                &mitm.trusted_certificates,
            )?;
            info!("Loaded {} trusted root certificates", trust_store.len());

            let key_log = match &mitm.key_log_file {
                Some(path) => {
                    info!("Writing TLS key log to {:?}", path);
                    Some(Arc::new(KeyLogWriter::open(path)?))
                }
                None => None,
            };

            let client_credentials = match &mitm.mutual_tls {
                Some(mtls) => Some(ClientCredentials::from_files(
                    &mtls.host,
                    &mtls.certificate_file,
                    &mtls.key_file,
                )?),
                None => None,
            };

            let preset = mitm.fingerprint_preset.as_deref().unwrap_or("none");
            if transparent {
                info!(
                    "Hijack mode: transparent (target: {}, fallback identity: {}, preset: {}, insecure allowed: {})",
                    config.transparent_target()?,
                    config.transparent.fallback_identity.as_deref().unwrap_or("target host"),
                    preset,
                    mitm.allow_insecure
                );
            } else {
                info!(
                    "Hijack mode: mitm (preset: {}, insecure allowed: {})",
                    preset, mitm.allow_insecure
                );
            }

            let settings = MitmSettings {
                generator: Arc::new(generator),
                dialer,
                trust_store: Arc::new(trust_store),
                key_log,
                allow_insecure: mitm.allow_insecure,
                client_credentials,
                fingerprint_preset: mitm.fingerprint_preset.clone(),
                local_alpn: mitm.local_alpn(),
                handshake_timeout: config.handshake_timeout(),
                announce_tunnel: !transparent,
                fallback_identity: transparent
                    .then(|| config.transparent.fallback_identity.clone())
                    .flatten(),
            };
            Ok(Arc::new(MitmHijacker::new(settings)))
        }
    }
}
