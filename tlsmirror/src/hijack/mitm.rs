//! TLS interception with upstream fingerprint mimicry.
//!
//! The local handshake depends on the upstream one (ALPN, leaf identity), and
//! the upstream one depends on the client's ClientHello. Both are resolved
//! without TLS library callbacks: the first client record is read off the tee
//! primary and only replayed into the local acceptor once the upstream
//! handshake is done and the leaf is issued.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::{dial_error, relay_alpn, BoxedStream, ConnectionPair, Hijacker, PrefixedStream, TargetAddr, TeeStream};
use crate::cert_generator::{CertificateGenerator, IssuedCertificate, LeafCertificateRequest};
use crate::certificates::{ClientCredentials, TrustStore};
use crate::constants::TUNNEL_ESTABLISHED_RESPONSE;
use crate::dialer::Dialer;
use crate::error::{HijackError, MirrorError, Result};
use crate::tls::fingerprint::alpn_wire_format;
use crate::tls::fingerprinter::read_hello_record;
use crate::tls::{keylog, presets, Fingerprinter, FingerprinterHandle, KeyLogWriter};
use crate::tls::{FingerprintSpec, MimicConnector, UpstreamServerName};

/// Stages of one interception attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitmState {
    AwaitHello,
    ResolveIdentity,
    DialUpstream,
    DecideServerName,
    AwaitFingerprint,
    UpstreamHandshake,
    RelayAlpn,
    IssueCert,
    LocalHandshake,
    Relaying,
    Closed,
}

impl fmt::Display for MitmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MitmState::AwaitHello => "await-hello",
            MitmState::ResolveIdentity => "resolve-identity",
            MitmState::DialUpstream => "dial-upstream",
            MitmState::DecideServerName => "decide-server-name",
            MitmState::AwaitFingerprint => "await-fingerprint",
            MitmState::UpstreamHandshake => "upstream-handshake",
            MitmState::RelayAlpn => "relay-alpn",
            MitmState::IssueCert => "issue-cert",
            MitmState::LocalHandshake => "local-handshake",
            MitmState::Relaying => "relaying",
            MitmState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one connection.
struct Transitions<'a> {
    target: &'a TargetAddr,
    state: MitmState,
}

impl<'a> Transitions<'a> {
    fn start(target: &'a TargetAddr) -> Self {
        debug!("{}: -> {}", target, MitmState::AwaitHello);
        Self {
            target,
            state: MitmState::AwaitHello,
        }
    }

    fn advance(&mut self, next: MitmState) {
        debug!("{}: {} -> {}", self.target, self.state, next);
        self.state = next;
    }
}

/// Everything the MITM hijacker needs, loaded once at startup.
pub struct MitmSettings {
    pub generator: Arc<CertificateGenerator>,
    pub dialer: Arc<dyn Dialer>,
    pub trust_store: Arc<TrustStore>,
    pub key_log: Option<Arc<KeyLogWriter>>,
    /// Dial without verification when neither SNI nor a hostname is known
    pub allow_insecure: bool,
    pub client_credentials: Option<ClientCredentials>,
    /// Named template replacing the captured fingerprint
    pub fingerprint_preset: Option<String>,
    /// Local ALPN offers used when the upstream negotiated none
    pub local_alpn: Vec<Vec<u8>>,
    pub handshake_timeout: Duration,
    /// Write the tunnel-established response first (CONNECT listener only)
    pub announce_tunnel: bool,
    /// Leaf identity when the client sends no SNI, instead of the target host
    pub fallback_identity: Option<String>,
}

pub struct MitmHijacker {
    settings: MitmSettings,
    connector: MimicConnector,
}

impl MitmHijacker {
    pub fn new(settings: MitmSettings) -> Self {
        let connector = MimicConnector::new(
            settings.trust_store.clone(),
            settings.key_log.clone(),
            settings.client_credentials.clone(),
        );
        Self {
            settings,
            connector,
        }
    }

    async fn deadline<F, T>(&self, stage: &'static str, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.settings.handshake_timeout, future)
            .await
            .map_err(|_| MirrorError::timeout(stage))?
    }

    fn upstream_spec(&self, captured: FingerprintSpec) -> Result<FingerprintSpec> {
        let Some(name) = &self.settings.fingerprint_preset else {
            return Ok(captured);
        };
        debug!("Using fingerprint preset '{}' with client ALPN", name);
        presets::preset_with_alpn(name, captured.alpn_offers)
            .ok_or_else(|| MirrorError::config_error(format!("unknown fingerprint preset '{name}'")))
    }

    fn build_acceptor(&self, leaf: &IssuedCertificate, alpn: &[Vec<u8>]) -> Result<SslAcceptor> {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        builder.set_certificate(&leaf.certificate)?;
        builder.set_private_key(&leaf.private_key)?;

        if !alpn.is_empty() {
            let wire = alpn_wire_format(alpn);
            builder.set_alpn_select_callback(move |_, client_offers| {
                select_next_proto(&wire, client_offers).ok_or(AlpnError::NOACK)
            });
        }

        if let Some(key_log) = &self.settings.key_log {
            keylog::install(&mut builder, key_log.clone());
        }

        Ok(builder.build())
    }

    async fn establish(
        &self,
        target: &TargetAddr,
        client: BoxedStream,
        fingerprinter: &mut Option<FingerprinterHandle>,
        transitions: &mut Transitions<'_>,
    ) -> Result<ConnectionPair> {
        let (mut primary, shadow) = TeeStream::wrap(client);
        let handle = fingerprinter.insert(Fingerprinter::spawn(shadow));

        let record = self
            .deadline("client hello", read_hello_record(&mut primary))
            .await?;
        let sni = record.info.sni.clone().filter(|name| !name.is_empty());
        trace!("{}: client SNI {:?}", target, sni);

        transitions.advance(MitmState::ResolveIdentity);
        let hostname = (!target.is_ip_literal()).then(|| target.host.clone());

        transitions.advance(MitmState::DialUpstream);
        let address = target.to_string();
        let mut upstream = self
            .settings
            .dialer
            .dial("tcp", &address)
            .await
            .map_err(|e| dial_error(&address, e))?;

        transitions.advance(MitmState::DecideServerName);
        let server_name = match sni.clone().or(hostname) {
            Some(name) => UpstreamServerName::Verified(name),
            None if self.settings.allow_insecure => UpstreamServerName::Insecure,
            None => {
                close_leg(&mut upstream).await;
                return Err(HijackError::InsecureConnectionRequired { target: address }.into());
            }
        };

        transitions.advance(MitmState::AwaitFingerprint);
        let fingerprint = self.deadline("fingerprint extraction", handle.wait()).await?;
        let spec = self.upstream_spec(fingerprint.spec)?;
        debug!("{}: upstream JA3 {}", target, spec.ja3());

        transitions.advance(MitmState::UpstreamHandshake);
        let server_tls = self
            .deadline(
                "upstream handshake",
                self.connector.connect(&spec, &server_name, upstream),
            )
            .await?;

        transitions.advance(MitmState::RelayAlpn);
        let negotiated = server_tls.ssl().selected_alpn_protocol().map(<[u8]>::to_vec);
        let local_alpn = relay_alpn(&self.settings.local_alpn, negotiated.as_deref());
        debug!(
            "{}: upstream negotiated {:?}, offering {:?} locally",
            target,
            negotiated.as_deref().map(String::from_utf8_lossy),
            local_alpn.iter().map(|p| String::from_utf8_lossy(p)).collect::<Vec<_>>()
        );

        transitions.advance(MitmState::IssueCert);
        let request = match &sni {
            Some(name) => LeafCertificateRequest::for_dns_name(name.clone()),
            None => LeafCertificateRequest::for_identity(
                self.settings
                    .fallback_identity
                    .as_deref()
                    .unwrap_or(&target.host),
            ),
        };
        let leaf = self.settings.generator.generate_child(&request)?;

        transitions.advance(MitmState::LocalHandshake);
        let acceptor = self.build_acceptor(&leaf, &local_alpn)?;
        let replay = PrefixedStream::new(record.bytes, primary);
        let client_tls = self
            .deadline("local handshake", async {
                tokio_boring::accept(&acceptor, replay).await.map_err(|e| {
                    MirrorError::from(HijackError::Handshake {
                        reason: e.to_string(),
                    })
                })
            })
            .await?;

        Ok(ConnectionPair {
            client: Box::new(client_tls),
            server: Box::new(server_tls),
        })
    }
}

#[async_trait]
impl Hijacker for MitmHijacker {
    async fn get_conns(&self, target: &TargetAddr, mut client: BoxedStream) -> Result<ConnectionPair> {
        if self.settings.announce_tunnel {
            client.write_all(TUNNEL_ESTABLISHED_RESPONSE).await?;
            client.flush().await?;
        }

        let mut transitions = Transitions::start(target);
        let mut fingerprinter = None;

        match self
            .establish(target, client, &mut fingerprinter, &mut transitions)
            .await
        {
            Ok(pair) => {
                transitions.advance(MitmState::Relaying);
                Ok(pair)
            }
            Err(e) => {
                if let Some(handle) = &fingerprinter {
                    handle.abort();
                }
                transitions.advance(MitmState::Closed);
                Err(e)
            }
        }
    }
}

async fn close_leg<S: AsyncWrite + Unpin + ?Sized>(leg: &mut S) {
    if let Err(e) = leg.shutdown().await {
        trace!("Shutdown of abandoned leg failed: {}", e);
    }
}
