//! Upstream connector that reproduces a captured ClientHello.
//!
//! BoringSSL owns the handshake, so mimicry works through its knobs:
//! - cipher suite order (TLS 1.2 suites; TLS 1.3 suites are fixed by BoringSSL)
//! - GREASE
//! - supported groups and signature algorithm order
//! - protocol version range
//! - OCSP stapling and SCT requests, session tickets
//! - ALPN offers and SNI presence
//!
//! Extension order is BoringSSL's own unless the client shuffled its
//! extensions, in which case BoringSSL permutes them too. Extensions it
//! decides on alone (padding, key shares) are reported at debug level.

use std::sync::Arc;

use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslOptions, SslVerifyMode, SslVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_boring::SslStream;
use tracing::{debug, warn};

use super::client_hello::{
    EXT_ALPN, EXT_EC_POINT_FORMATS, EXT_EXTENDED_MASTER_SECRET, EXT_KEY_SHARE,
    EXT_PRE_SHARED_KEY, EXT_PSK_KEY_EXCHANGE_MODES, EXT_RENEGOTIATION_INFO, EXT_SCT, EXT_SERVER_NAME,
    EXT_SESSION_TICKET, EXT_SIGNATURE_ALGORITHMS, EXT_STATUS_REQUEST, EXT_SUPPORTED_GROUPS,
    EXT_SUPPORTED_VERSIONS,
};
use super::fingerprint::{is_grease, FingerprintSpec};
use super::keylog::{self, KeyLogWriter};
use crate::certificates::{ClientCredentials, TrustStore};
use crate::error::{HijackError, Result};

/// Extensions whose presence BoringSSL reproduces from the settings applied here.
const REPRODUCED_EXTENSIONS: &[u16] = &[
    EXT_SERVER_NAME,
    EXT_STATUS_REQUEST,
    EXT_SUPPORTED_GROUPS,
    EXT_EC_POINT_FORMATS,
    EXT_SIGNATURE_ALGORITHMS,
    EXT_ALPN,
    EXT_SCT,
    EXT_EXTENDED_MASTER_SECRET,
    EXT_SESSION_TICKET,
    EXT_SUPPORTED_VERSIONS,
    EXT_PSK_KEY_EXCHANGE_MODES,
    EXT_KEY_SHARE,
    EXT_RENEGOTIATION_INFO,
];

/// Order of ClientHello extensions BoringSSL writes without permutation.
const BORINGSSL_EXTENSION_ORDER: &[u16] = &[
    EXT_SERVER_NAME,
    0xfe0d, // encrypted_client_hello
    EXT_EXTENDED_MASTER_SECRET,
    EXT_RENEGOTIATION_INFO,
    EXT_SUPPORTED_GROUPS,
    EXT_EC_POINT_FORMATS,
    EXT_SESSION_TICKET,
    EXT_ALPN,
    EXT_STATUS_REQUEST,
    EXT_SIGNATURE_ALGORITHMS,
    0x3374, // next_protocol_negotiation
    EXT_SCT,
    0x7550, // channel_id
    0x000e, // use_srtp
    EXT_KEY_SHARE,
    EXT_PSK_KEY_EXCHANGE_MODES,
    0x002a, // early_data
    EXT_SUPPORTED_VERSIONS,
    0x002c, // cookie
    0x0039, // quic_transport_parameters
    0x001b, // compress_certificate
    0x0022, // delegated_credential
    0x4469, // application_settings
    0x44cd, // application_settings (new codepoint)
    EXT_PRE_SHARED_KEY,
];

/// Whether the client's extension order is one unpermuted BoringSSL never emits.
///
/// Only GREASE-sending clients count: a permuting BoringSSL client always greases.
pub fn permutes_extensions(spec: &FingerprintSpec) -> bool {
    if !spec.has_grease() {
        return false;
    }
    let positions: Vec<usize> = spec
        .extension_ids()
        .filter_map(|id| BORINGSSL_EXTENSION_ORDER.iter().position(|&known| known == id))
        .collect();
    positions.windows(2).any(|pair| pair[0] > pair[1])
}

/// Name the upstream certificate is verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamServerName {
    Verified(String),
    /// No usable name; certificate verification is disabled.
    Insecure,
}

impl UpstreamServerName {
    pub fn as_str(&self) -> &str {
        match self {
            UpstreamServerName::Verified(name) => name,
            UpstreamServerName::Insecure => "",
        }
    }
}

pub fn cipher_name(suite: u16) -> Option<&'static str> {
    match suite {
        0xc02b => Some("ECDHE-ECDSA-AES128-GCM-SHA256"),
        0xc02f => Some("ECDHE-RSA-AES128-GCM-SHA256"),
        0xc02c => Some("ECDHE-ECDSA-AES256-GCM-SHA384"),
        0xc030 => Some("ECDHE-RSA-AES256-GCM-SHA384"),
        0xcca9 => Some("ECDHE-ECDSA-CHACHA20-POLY1305"),
        0xcca8 => Some("ECDHE-RSA-CHACHA20-POLY1305"),
        0xc009 => Some("ECDHE-ECDSA-AES128-SHA"),
        0xc00a => Some("ECDHE-ECDSA-AES256-SHA"),
        0xc013 => Some("ECDHE-RSA-AES128-SHA"),
        0xc014 => Some("ECDHE-RSA-AES256-SHA"),
        0x009c => Some("AES128-GCM-SHA256"),
        0x009d => Some("AES256-GCM-SHA384"),
        0x002f => Some("AES128-SHA"),
        0x0035 => Some("AES256-SHA"),
        0x000a => Some("DES-CBC3-SHA"),
        _ => None,
    }
}

pub fn group_name(group: u16) -> Option<&'static str> {
    match group {
        0x001d => Some("X25519"),
        0x0017 => Some("P-256"),
        0x0018 => Some("P-384"),
        0x0019 => Some("P-521"),
        0x11ec => Some("X25519MLKEM768"),
        0x6399 => Some("X25519Kyber768Draft00"),
        _ => None,
    }
}

pub fn sigalg_name(alg: u16) -> Option<&'static str> {
    match alg {
        0x0403 => Some("ECDSA+SHA256"),
        0x0503 => Some("ECDSA+SHA384"),
        0x0603 => Some("ECDSA+SHA512"),
        0x0804 => Some("RSA-PSS+SHA256"),
        0x0805 => Some("RSA-PSS+SHA384"),
        0x0806 => Some("RSA-PSS+SHA512"),
        0x0401 => Some("RSA+SHA256"),
        0x0501 => Some("RSA+SHA384"),
        0x0601 => Some("RSA+SHA512"),
        0x0201 => Some("RSA+SHA1"),
        0x0203 => Some("ECDSA+SHA1"),
        0x0807 => Some("ed25519"),
        _ => None,
    }
}

fn ssl_version(version: u16) -> Option<SslVersion> {
    match version {
        0x0301 => Some(SslVersion::TLS1),
        0x0302 => Some(SslVersion::TLS1_1),
        0x0303 => Some(SslVersion::TLS1_2),
        0x0304 => Some(SslVersion::TLS1_3),
        _ => None,
    }
}

/// Colon-joined list of the names `map` knows, in observed order, without repeats.
fn name_list(values: &[u16], map: fn(u16) -> Option<&'static str>) -> String {
    let mut names: Vec<&str> = Vec::new();
    for name in values.iter().filter(|v| !is_grease(**v)).filter_map(|&v| map(v)) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.join(":")
}

/// Lowest and highest protocol version the client offered.
pub fn version_range(spec: &FingerprintSpec) -> (u16, u16) {
    let offered: Vec<u16> = spec
        .supported_versions
        .iter()
        .copied()
        .filter(|&v| ssl_version(v).is_some())
        .collect();

    match (offered.iter().min(), offered.iter().max()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => (0x0301, spec.legacy_version.clamp(0x0301, 0x0303)),
    }
}

/// Applies the fingerprint-derived settings to a connector builder.
pub fn apply_fingerprint(builder: &mut SslConnectorBuilder, spec: &FingerprintSpec) -> Result<()> {
    let ciphers = name_list(&spec.cipher_suites, cipher_name);
    if !ciphers.is_empty() {
        if let Err(e) = builder.set_cipher_list(&ciphers) {
            debug!("Cipher list '{}' rejected, keeping defaults: {}", ciphers, e);
        }
    }

    if spec.has_grease() {
        builder.set_grease_enabled(true);
    }
    if permutes_extensions(spec) {
        debug!("Client permutes its extensions, permuting upstream too");
        builder.set_permute_extensions(true);
    }

    let groups = name_list(&spec.curves, group_name);
    if !groups.is_empty() {
        if let Err(e) = builder.set_curves_list(&groups) {
            debug!("Groups '{}' rejected, keeping defaults: {}", groups, e);
        }
    }

    let sigalgs = name_list(&spec.signature_algorithms, sigalg_name);
    if !sigalgs.is_empty() {
        if let Err(e) = builder.set_sigalgs_list(&sigalgs) {
            debug!("Signature algorithms '{}' rejected, keeping defaults: {}", sigalgs, e);
        }
    }

    let (min, max) = version_range(spec);
    builder.set_min_proto_version(ssl_version(min))?;
    builder.set_max_proto_version(ssl_version(max))?;

    if spec.has_extension(EXT_STATUS_REQUEST) {
        builder.enable_ocsp_stapling();
    }
    if spec.has_extension(EXT_SCT) {
        builder.enable_signed_cert_timestamps();
    }
    if !spec.sends_session_ticket() {
        builder.set_options(SslOptions::NO_TICKET);
    }

    if !spec.alpn_offers.is_empty() {
        builder.set_alpn_protos(&spec.alpn_wire())?;
    }

    let unsupported: Vec<String> = spec
        .extension_ids()
        .filter(|id| !is_grease(*id) && !REPRODUCED_EXTENSIONS.contains(id))
        .map(|id| format!("{id:#06x}"))
        .collect();
    if !unsupported.is_empty() {
        debug!("Extensions left to BoringSSL defaults: {:?}", unsupported);
    }

    Ok(())
}

/// Builds per-connection upstream connectors from a fingerprint.
pub struct MimicConnector {
    trust_store: Arc<TrustStore>,
    key_log: Option<Arc<KeyLogWriter>>,
    client_credentials: Option<ClientCredentials>,
}

impl MimicConnector {
    pub fn new(
        trust_store: Arc<TrustStore>,
        key_log: Option<Arc<KeyLogWriter>>,
        client_credentials: Option<ClientCredentials>,
    ) -> Self {
        Self {
            trust_store,
            key_log,
            client_credentials,
        }
    }

    pub fn build(&self, spec: &FingerprintSpec, server_name: &UpstreamServerName) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        apply_fingerprint(&mut builder, spec)?;

        match server_name {
            UpstreamServerName::Insecure => {
                warn!("Upstream certificate verification disabled, no server name available");
                builder.set_verify(SslVerifyMode::NONE);
            }
            UpstreamServerName::Verified(name) => {
                builder.set_verify(SslVerifyMode::PEER);
                builder.set_cert_store_ref(self.trust_store.cert_store());

                if let Some(credentials) = self
                    .client_credentials
                    .as_ref()
                    .filter(|c| c.matches(name))
                {
                    debug!("Presenting client certificate to {}", name);
                    builder.set_certificate(&credentials.certificate)?;
                    builder.set_private_key(&credentials.private_key)?;
                }
            }
        }

        if let Some(key_log) = &self.key_log {
            keylog::install(&mut builder, key_log.clone());
        }

        Ok(builder.build())
    }

    /// Performs the upstream handshake over `stream`.
    pub async fn connect<S>(
        &self,
        spec: &FingerprintSpec,
        server_name: &UpstreamServerName,
        stream: S,
    ) -> Result<SslStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connector = self.build(spec, server_name)?;
        let mut config = connector.configure()?;

        let verified = matches!(server_name, UpstreamServerName::Verified(_));
        config.set_use_server_name_indication(spec.sends_sni() && verified);
        config.set_verify_hostname(verified);

        tokio_boring::connect(config, server_name.as_str(), stream)
            .await
            .map_err(|e| {
                HijackError::UpstreamHandshake {
                    server_name: server_name.as_str().to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::client_hello::parse_client_hello;
    use crate::tls::client_hello::test_records::client_hello;
    use crate::tls::presets::{preset, PRESET_GRPC_OKHTTP, PRESET_SAFARI};
    use rstest::rstest;

    fn captured() -> FingerprintSpec {
        let record = client_hello(Some("example.com"), &["h2", "http/1.1"]);
        FingerprintSpec::from_client_hello(&parse_client_hello(&record).unwrap().unwrap())
    }

    #[test]
    fn test_cipher_list_keeps_order_and_skips_tls13() {
        assert_eq!(
            name_list(&captured().cipher_suites, cipher_name),
            "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:AES128-GCM-SHA256"
        );
    }

    #[test]
    fn test_group_and_sigalg_lists() {
        let spec = captured();
        assert_eq!(name_list(&spec.curves, group_name), "X25519:P-256:P-384");
        assert_eq!(
            name_list(&spec.signature_algorithms, sigalg_name),
            "ECDSA+SHA256:RSA-PSS+SHA256:RSA+SHA256"
        );
    }

    #[test]
    fn test_duplicate_names_collapse() {
        // Safari lists RSA-PSS+SHA384 twice
        let spec = preset(PRESET_SAFARI).unwrap();
        let list = name_list(&spec.signature_algorithms, sigalg_name);
        assert_eq!(list.matches("RSA-PSS+SHA384").count(), 1);
    }

    #[rstest]
    #[case::tls13_and_12(vec![0x0a0a, 0x0304, 0x0303], 0x0303, (0x0303, 0x0304))]
    #[case::legacy_only(vec![], 0x0303, (0x0301, 0x0303))]
    #[case::down_to_tls10(vec![0x0304, 0x0303, 0x0302, 0x0301], 0x0303, (0x0301, 0x0304))]
    fn test_version_range(
        #[case] supported_versions: Vec<u16>,
        #[case] legacy_version: u16,
        #[case] expected: (u16, u16),
    ) {
        let spec = FingerprintSpec {
            supported_versions,
            legacy_version,
            ..Default::default()
        };
        assert_eq!(version_range(&spec), expected);
    }

    #[rstest]
    #[case::captured_order(captured(), false)]
    #[case::safari_order(preset(PRESET_SAFARI).unwrap(), false)]
    #[case::shuffled(shuffled(), true)]
    #[case::shuffled_without_grease(FingerprintSpec { cipher_suites: vec![0xc02b], ..shuffled_ungreased() }, false)]
    fn test_permutes_extensions(#[case] spec: FingerprintSpec, #[case] expected: bool) {
        assert_eq!(permutes_extensions(&spec), expected);
    }

    fn shuffled_ungreased() -> FingerprintSpec {
        let mut spec = shuffled();
        spec.extensions.retain(|e| !is_grease(e.id));
        spec.cipher_suites.retain(|&c| !is_grease(c));
        spec.curves.retain(|&c| !is_grease(c));
        spec.supported_versions.retain(|&v| !is_grease(v));
        spec
    }

    fn shuffled() -> FingerprintSpec {
        let mut spec = captured();
        // ALPN ahead of the server name, as a permuting client may send it
        let alpn = spec.extensions.iter().position(|e| e.id == EXT_ALPN).unwrap();
        let moved = spec.extensions.remove(alpn);
        spec.extensions.insert(1, moved);
        spec
    }

    #[test]
    fn test_connectors_build_for_captured_and_preset_specs() {
        let connector = MimicConnector::new(Arc::new(TrustStore::from_roots(Vec::new()).unwrap()), None, None);
        let name = UpstreamServerName::Verified("example.com".to_string());

        assert!(connector.build(&captured(), &name).is_ok());
        assert!(connector
            .build(&preset(PRESET_GRPC_OKHTTP).unwrap(), &UpstreamServerName::Insecure)
            .is_ok());
    }
}
