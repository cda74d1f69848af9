//! Named ClientHello templates.
//!
//! Used instead of the captured fingerprint only when a preset is configured.
//! The registry is built once on first access and never mutated.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::client_hello::{
    Extension, EXT_ALPN, EXT_EC_POINT_FORMATS, EXT_EXTENDED_MASTER_SECRET, EXT_KEY_SHARE,
    EXT_PADDING, EXT_PSK_KEY_EXCHANGE_MODES, EXT_RENEGOTIATION_INFO, EXT_SCT, EXT_SERVER_NAME,
    EXT_SESSION_TICKET, EXT_SIGNATURE_ALGORITHMS, EXT_STATUS_REQUEST, EXT_SUPPORTED_GROUPS,
    EXT_SUPPORTED_VERSIONS,
};
use super::fingerprint::FingerprintSpec;

pub const PRESET_CHROME: &str = "chrome";
pub const PRESET_FIREFOX_94_97: &str = "firefox_94_97";
pub const PRESET_SAFARI: &str = "safari";
pub const PRESET_GRPC_OKHTTP: &str = "grpc_okhttp";

const EXT_RECORD_SIZE_LIMIT: u16 = 0x001c;

struct Template {
    cipher_suites: &'static [u16],
    extensions: &'static [u16],
    curves: &'static [u16],
    signature_algorithms: &'static [u16],
    supported_versions: &'static [u16],
    alpn: &'static [&'static str],
}

impl Template {
    fn build(&self) -> FingerprintSpec {
        FingerprintSpec {
            legacy_version: 0x0303,
            cipher_suites: self.cipher_suites.to_vec(),
            compression_methods: vec![0],
            extensions: self
                .extensions
                .iter()
                .map(|&id| Extension {
                    id,
                    data: Vec::new(),
                })
                .collect(),
            curves: self.curves.to_vec(),
            point_formats: vec![0],
            signature_algorithms: self.signature_algorithms.to_vec(),
            supported_versions: self.supported_versions.to_vec(),
            alpn_offers: self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect(),
            server_name: None,
        }
    }
}

const CHROME: Template = Template {
    cipher_suites: &[
        0x0a0a, 0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013,
        0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
    ],
    extensions: &[
        0x0a0a,
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_RENEGOTIATION_INFO,
        EXT_SUPPORTED_GROUPS,
        EXT_EC_POINT_FORMATS,
        EXT_SESSION_TICKET,
        EXT_ALPN,
        EXT_STATUS_REQUEST,
        EXT_SIGNATURE_ALGORITHMS,
        EXT_SCT,
        EXT_KEY_SHARE,
        EXT_PSK_KEY_EXCHANGE_MODES,
        EXT_SUPPORTED_VERSIONS,
        0x1a1a,
        EXT_PADDING,
    ],
    curves: &[0x0a0a, 0x001d, 0x0017, 0x0018],
    signature_algorithms: &[
        0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
    ],
    supported_versions: &[0x0a0a, 0x0304, 0x0303],
    alpn: &["h2", "http/1.1"],
};

const FIREFOX_94_97: Template = Template {
    cipher_suites: &[
        0x1301, 0x1303, 0x1302, 0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a, 0xc009,
        0xc013, 0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
    ],
    extensions: &[
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_RENEGOTIATION_INFO,
        EXT_SUPPORTED_GROUPS,
        EXT_EC_POINT_FORMATS,
        EXT_ALPN,
        EXT_STATUS_REQUEST,
        EXT_KEY_SHARE,
        EXT_SUPPORTED_VERSIONS,
        EXT_SIGNATURE_ALGORITHMS,
        EXT_RECORD_SIZE_LIMIT,
        EXT_PADDING,
    ],
    curves: &[0x001d, 0x0017, 0x0018, 0x0019, 0x0100, 0x0101],
    signature_algorithms: &[
        0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
    ],
    supported_versions: &[0x0304, 0x0303],
    alpn: &["h2", "http/1.1"],
};

const SAFARI: Template = Template {
    cipher_suites: &[
        0x1301, 0x1302, 0x1303, 0xc02c, 0xc02b, 0xc024, 0xc023, 0xc00a, 0xc009, 0xcca9, 0xc030,
        0xc02f, 0xc028, 0xc027, 0xc014, 0xc013, 0xcca8, 0x009d, 0x009c, 0x003d, 0x003c, 0x0035,
        0x002f, 0xc008, 0xc012, 0x000a,
    ],
    extensions: &[
        EXT_RENEGOTIATION_INFO,
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_SIGNATURE_ALGORITHMS,
        EXT_STATUS_REQUEST,
        EXT_SCT,
        EXT_ALPN,
        EXT_EC_POINT_FORMATS,
        EXT_KEY_SHARE,
        EXT_PSK_KEY_EXCHANGE_MODES,
        EXT_SUPPORTED_VERSIONS,
        EXT_SUPPORTED_GROUPS,
        EXT_PADDING,
    ],
    curves: &[0x001d, 0x0017, 0x0018, 0x0019],
    signature_algorithms: &[
        0x0403, 0x0804, 0x0401, 0x0503, 0x0203, 0x0805, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
    ],
    supported_versions: &[0x0304, 0x0303, 0x0302, 0x0301],
    alpn: &["h2", "http/1.1"],
};

const GRPC_OKHTTP: Template = Template {
    cipher_suites: &[0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8],
    extensions: &[
        EXT_RENEGOTIATION_INFO,
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_SESSION_TICKET,
        EXT_SIGNATURE_ALGORITHMS,
        EXT_STATUS_REQUEST,
        EXT_ALPN,
        EXT_EC_POINT_FORMATS,
        EXT_SUPPORTED_GROUPS,
    ],
    curves: &[0x001d, 0x0017, 0x0018],
    signature_algorithms: &[
        0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
    ],
    supported_versions: &[],
    alpn: &["h2"],
};

static PRESETS: LazyLock<HashMap<&'static str, FingerprintSpec>> = LazyLock::new(|| {
    HashMap::from([
        (PRESET_CHROME, CHROME.build()),
        (PRESET_FIREFOX_94_97, FIREFOX_94_97.build()),
        (PRESET_SAFARI, SAFARI.build()),
        (PRESET_GRPC_OKHTTP, GRPC_OKHTTP.build()),
    ])
});

/// Returns a copy of the named template.
pub fn preset(name: &str) -> Option<FingerprintSpec> {
    PRESETS.get(name).cloned()
}

/// Returns the named template with its ALPN offers replaced by `alpn_offers`.
pub fn preset_with_alpn(name: &str, alpn_offers: Vec<Vec<u8>>) -> Option<FingerprintSpec> {
    preset(name).map(|spec| spec.with_alpn(alpn_offers))
}

pub fn preset_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PRESETS.keys().copied().collect();
    names.sort_unstable();
    names
}
