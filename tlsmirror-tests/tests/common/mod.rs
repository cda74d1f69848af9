#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boring::asn1::Asn1Time;
use boring::ec::{EcGroup, EcKey};
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::{PKey, Private};
use boring::ssl::{
    select_next_proto, AlpnError, NameType, SslAcceptor, SslConnector, SslMethod, SslVerifyMode,
};
use boring::x509::extension::BasicConstraints;
use boring::x509::{X509Builder, X509NameBuilder, X509};
use rstest::fixture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_boring::SslStream;

use tlsmirror::cert_generator::{CertificateGenerator, LeafCertificateRequest};
use tlsmirror::certificates::TrustStore;
use tlsmirror::constants::TUNNEL_ESTABLISHED_RESPONSE;
use tlsmirror::dialer::Dialer;
use tlsmirror::error::NetworkError;
use tlsmirror::hijack::{BoxedStream, Hijacker, MitmSettings, TargetAddr};
use tlsmirror::relay::{relay, RelayStats};
use tlsmirror::Result;

pub const UPSTREAM_ALPN: &[u8] = b"\x02h2\x08http/1.1";
pub const DEADLINE: Duration = Duration::from_secs(10);

/// Self-signed CA used both as the interception CA and as the origin's issuer.
pub struct TestCa {
    pub certificate: X509,
    pub key: PKey<Private>,
}

impl TestCa {
    pub fn generator(&self) -> CertificateGenerator {
        CertificateGenerator::new(self.certificate.clone(), self.key.clone())
    }

    pub fn write_pem_files(&self, dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let cert_path = dir.join("ca.pem");
        let key_path = dir.join("ca.key");
        std::fs::write(&cert_path, self.certificate.to_pem().unwrap()).unwrap();
        std::fs::write(&key_path, self.key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        (cert_path, key_path)
    }
}

#[fixture]
pub fn test_ca() -> TestCa {
    generate_ca()
}

pub fn generate_ca() -> TestCa {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "tlsmirror integration CA")
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    TestCa {
        certificate: builder.build(),
        key,
    }
}

/// What the origin server saw on one dialed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Handshake {
        server_name: Option<String>,
        alpn: Option<Vec<u8>>,
        version: String,
        client_certificate: bool,
    },
    HandshakeFailed,
    /// Raw origin only: the connection ended after this many bytes
    Closed { bytes_received: usize },
}

pub enum Origin {
    /// TLS origin with a certificate for the given names, echoing plaintext
    Tls(Arc<SslAcceptor>),
    /// Plain TCP origin that only counts what it receives
    Raw,
    /// Every dial times out
    Unreachable,
}

/// Dialer handing out in-memory connections to a simulated origin.
pub struct MockDialer {
    origin: Origin,
    dials: AtomicUsize,
    addresses: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
}

impl MockDialer {
    pub fn new(origin: Origin) -> (Arc<Self>, mpsc::UnboundedReceiver<UpstreamEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            origin,
            dials: AtomicUsize::new(0),
            addresses: Mutex::new(Vec::new()),
            events,
        });
        (dialer, rx)
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.addresses.lock().await.clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _network: &str, address: &str) -> Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().await.push(address.to_string());

        if let Origin::Unreachable = self.origin {
            return Err(NetworkError::Timeout {
                address: address.to_string(),
            }
            .into());
        }

        let (proxy_end, origin_end) = tokio::io::duplex(64 * 1024);
        let events = self.events.clone();
        match &self.origin {
            Origin::Tls(acceptor) => {
                tokio::spawn(serve_tls_origin(acceptor.clone(), origin_end, events));
            }
            Origin::Raw => {
                tokio::spawn(serve_raw_origin(origin_end, events));
            }
            Origin::Unreachable => {}
        }
        Ok(Box::new(proxy_end))
    }
}

async fn serve_tls_origin(
    acceptor: Arc<SslAcceptor>,
    stream: DuplexStream,
    events: mpsc::UnboundedSender<UpstreamEvent>,
) {
    let tls = match tokio_boring::accept(&acceptor, stream).await {
        Ok(tls) => tls,
        Err(_) => {
            let _ = events.send(UpstreamEvent::HandshakeFailed);
            return;
        }
    };

    let ssl = tls.ssl();
    let _ = events.send(UpstreamEvent::Handshake {
        server_name: ssl.servername(NameType::HOST_NAME).map(str::to_string),
        alpn: ssl.selected_alpn_protocol().map(<[u8]>::to_vec),
        version: ssl.version_str().to_string(),
        client_certificate: ssl.peer_certificate().is_some(),
    });

    let (mut reader, mut writer) = tokio::io::split(tls);
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}

async fn serve_raw_origin(mut stream: DuplexStream, events: mpsc::UnboundedSender<UpstreamEvent>) {
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    let _ = events.send(UpstreamEvent::Closed {
        bytes_received: received.len(),
    });
}

/// Origin acceptor with a certificate for `names`, preferring h2.
/// Client certificates are requested and accepted without verification.
pub fn origin_acceptor(ca: &TestCa, names: &[&str]) -> Arc<SslAcceptor> {
    let request = LeafCertificateRequest {
        dns_names: names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>(),
        ..Default::default()
    };
    let leaf = ca.generator().generate_child(&request).unwrap();

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    builder.set_certificate(&leaf.certificate).unwrap();
    builder.set_private_key(&leaf.private_key).unwrap();
    builder.set_alpn_select_callback(|_, client| {
        select_next_proto(UPSTREAM_ALPN, client).ok_or(AlpnError::NOACK)
    });
    builder.set_verify_callback(SslVerifyMode::PEER, |_, _| true);
    Arc::new(builder.build())
}

pub fn mitm_settings(ca: &TestCa, dialer: Arc<dyn Dialer>) -> MitmSettings {
    MitmSettings {
        generator: Arc::new(ca.generator()),
        dialer,
        trust_store: Arc::new(TrustStore::from_roots(vec![ca.certificate.clone()]).unwrap()),
        key_log: None,
        allow_insecure: false,
        client_credentials: None,
        fingerprint_preset: None,
        local_alpn: Vec::new(),
        handshake_timeout: Duration::from_secs(5),
        announce_tunnel: true,
        fallback_identity: None,
    }
}

/// Client connector trusting the interception CA.
pub fn client_connector(ca: &TestCa, alpn: &[&str]) -> SslConnector {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
    builder.cert_store_mut().add_cert(ca.certificate.clone()).unwrap();
    if !alpn.is_empty() {
        let mut wire = Vec::new();
        for proto in alpn {
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        builder.set_alpn_protos(&wire).unwrap();
    }
    builder.build()
}

/// Runs the hijacker and the relay over an in-memory client connection.
pub fn spawn_tunnel(
    hijacker: Arc<dyn Hijacker>,
    target: TargetAddr,
) -> (DuplexStream, JoinHandle<Result<RelayStats>>) {
    let (client_end, proxy_end) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(async move {
        let pair = hijacker.get_conns(&target, Box::new(proxy_end)).await?;
        Ok(relay(pair).await)
    });
    (client_end, task)
}

/// Consumes the tunnel-established response, then handshakes through the tunnel.
///
/// Without `sni` no server name is sent and hostname checks are skipped.
pub async fn connect_through<S>(
    connector: &SslConnector,
    mut client_end: S,
    sni: Option<&str>,
) -> std::result::Result<SslStream<S>, String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut response = vec![0u8; TUNNEL_ESTABLISHED_RESPONSE.len()];
    client_end
        .read_exact(&mut response)
        .await
        .map_err(|e| e.to_string())?;
    assert_eq!(response, TUNNEL_ESTABLISHED_RESPONSE);

    tls_connect(connector, client_end, sni).await
}

/// Client handshake over `stream`, as in [`connect_through`].
pub async fn tls_connect<S>(
    connector: &SslConnector,
    stream: S,
    sni: Option<&str>,
) -> std::result::Result<SslStream<S>, String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut config = connector.configure().map_err(|e| e.to_string())?;
    let domain = match sni {
        Some(name) => name,
        None => {
            config.set_use_server_name_indication(false);
            config.set_verify_hostname(false);
            ""
        }
    };
    tokio_boring::connect(config, domain, stream)
        .await
        .map_err(|e| e.to_string())
}

/// DNS and IP SAN entries of a certificate, rendered as strings.
pub fn san_entries(cert: &X509) -> Vec<String> {
    let mut entries = Vec::new();
    if let Some(names) = cert.subject_alt_names() {
        for entry in names.iter() {
            if let Some(name) = entry.dnsname() {
                entries.push(name.to_string());
            }
            match entry.ipaddress().map(<[u8]>::len) {
                Some(4) => {
                    let octets: [u8; 4] = entry.ipaddress().unwrap().try_into().unwrap();
                    entries.push(IpAddr::from(octets).to_string());
                }
                Some(16) => {
                    let octets: [u8; 16] = entry.ipaddress().unwrap().try_into().unwrap();
                    entries.push(IpAddr::from(octets).to_string());
                }
                _ => {}
            }
        }
    }
    entries
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<UpstreamEvent>) -> UpstreamEvent {
    tokio::time::timeout(DEADLINE, events.recv())
        .await
        .expect("origin event timed out")
        .expect("origin event channel closed")
}
