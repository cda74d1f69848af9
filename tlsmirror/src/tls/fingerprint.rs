//! Replayable description of a client's ClientHello.

use super::client_hello::{
    ClientHelloInfo, Extension, EXT_ALPN, EXT_SERVER_NAME, EXT_SESSION_TICKET,
};

/// Reserved GREASE values (RFC 8701). Excluded from JA3.
pub const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa, 0xbaba,
    0xcaca, 0xdada, 0xeaea, 0xfafa,
];

pub fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && value >> 8 == value & 0xff
}

/// The observed shape of one ClientHello: order and literal parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintSpec {
    pub legacy_version: u16,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub alpn_offers: Vec<Vec<u8>>,
    pub server_name: Option<String>,
}

impl FingerprintSpec {
    pub fn from_client_hello(info: &ClientHelloInfo) -> Self {
        Self {
            legacy_version: info.legacy_version,
            cipher_suites: info.cipher_suites.clone(),
            compression_methods: info.compression_methods.clone(),
            extensions: info.extensions.clone(),
            curves: info.supported_groups.clone(),
            point_formats: info.ec_point_formats.clone(),
            signature_algorithms: info.signature_algorithms.clone(),
            supported_versions: info.supported_versions.clone(),
            alpn_offers: info.alpn.clone(),
            server_name: info.sni.clone(),
        }
    }

    /// Replaces the ALPN offers of a template, keeping everything else.
    pub fn with_alpn(mut self, alpn_offers: Vec<Vec<u8>>) -> Self {
        if self.has_extension(EXT_ALPN) || !alpn_offers.is_empty() {
            if !self.has_extension(EXT_ALPN) {
                self.extensions.push(Extension {
                    id: EXT_ALPN,
                    data: Vec::new(),
                });
            }
            self.alpn_offers = alpn_offers;
        }
        self
    }

    pub fn extension_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.extensions.iter().map(|e| e.id)
    }

    pub fn has_extension(&self, id: u16) -> bool {
        self.extension_ids().any(|e| e == id)
    }

    pub fn sends_sni(&self) -> bool {
        self.has_extension(EXT_SERVER_NAME)
    }

    pub fn sends_session_ticket(&self) -> bool {
        self.has_extension(EXT_SESSION_TICKET)
    }

    /// Whether the client sprinkled GREASE into any of its lists.
    pub fn has_grease(&self) -> bool {
        self.cipher_suites.iter().any(|&v| is_grease(v))
            || self.extension_ids().any(is_grease)
            || self.curves.iter().any(|&v| is_grease(v))
            || self.supported_versions.iter().any(|&v| is_grease(v))
    }

    /// JA3 string: `version,ciphers,extensions,curves,point_formats`.
    pub fn ja3(&self) -> String {
        fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
            values.map(|v| v.to_string()).collect::<Vec<_>>().join("-")
        }

        format!(
            "{},{},{},{},{}",
            self.legacy_version,
            join(self.cipher_suites.iter().filter(|v| !is_grease(**v))),
            join(self.extension_ids().filter(|v| !is_grease(*v))),
            join(self.curves.iter().filter(|v| !is_grease(**v))),
            join(self.point_formats.iter()),
        )
    }

    /// ALPN offers in wire format (length-prefixed names).
    pub fn alpn_wire(&self) -> Vec<u8> {
        alpn_wire_format(&self.alpn_offers)
    }
}

/// Encodes protocol names the way `SSL_set_alpn_protos` expects them.
pub fn alpn_wire_format(protocols: &[Vec<u8>]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        if proto.is_empty() || proto.len() > u8::MAX as usize {
            continue;
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto);
    }
    wire
}
