use bytes::Buf;
use thiserror::Error;

use crate::constants::{TLS_HANDSHAKE_CONTENT_TYPE, TLS_RECORD_HEADER_LEN};

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_STATUS_REQUEST: u16 = 0x0005;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
pub const EXT_EC_POINT_FORMATS: u16 = 0x000b;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_SCT: u16 = 0x0012;
pub const EXT_PADDING: u16 = 0x0015;
pub const EXT_EXTENDED_MASTER_SECRET: u16 = 0x0017;
pub const EXT_SESSION_TICKET: u16 = 0x0023;
pub const EXT_PRE_SHARED_KEY: u16 = 0x0029;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
pub const EXT_KEY_SHARE: u16 = 0x0033;
pub const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlsParseError {
    #[error("Incomplete data")]
    Incomplete,
    #[error("Invalid TLS record (content type {0:#04x})")]
    InvalidRecord(u8),
    #[error("Not a ClientHello (handshake type {0})")]
    NotClientHello(u8),
    #[error("Protocol error: truncated {0}")]
    ProtocolError(&'static str),
}

/// One ClientHello extension, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub id: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub legacy_version: u16,
    pub session_id: Option<Vec<u8>>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
    pub sni: Option<String>,
    pub alpn: Vec<Vec<u8>>,
    pub supported_groups: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
}

impl ClientHelloInfo {
    /// ALPN offers as text, for logging.
    pub fn alpn_protocols(&self) -> Vec<String> {
        self.alpn
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }
}

/// Validates a record header and returns the body length it announces.
pub fn record_body_len(header: &[u8]) -> Result<usize, TlsParseError> {
    if header.len() < TLS_RECORD_HEADER_LEN {
        return Err(TlsParseError::ProtocolError("record header"));
    }
    if header[0] != TLS_HANDSHAKE_CONTENT_TYPE {
        return Err(TlsParseError::InvalidRecord(header[0]));
    }
    Ok(u16::from_be_bytes([header[3], header[4]]) as usize)
}

/// Parses the beginning of a TCP stream to extract ClientHello information.
/// returns `Ok(Some(info))` if successful, `Ok(None)` if incomplete, or `Err` if invalid.
pub fn parse_client_hello(buf: &[u8]) -> Result<Option<ClientHelloInfo>, TlsParseError> {
    if buf.len() < TLS_RECORD_HEADER_LEN {
        return Ok(None);
    }

    let length = record_body_len(buf)?;
    if buf.len() < TLS_RECORD_HEADER_LEN + length {
        return Ok(None); // Need more data
    }

    parse_handshake(&buf[TLS_RECORD_HEADER_LEN..TLS_RECORD_HEADER_LEN + length]).map(Some)
}

/// Parses the body of a handshake record holding a ClientHello.
pub fn parse_handshake(body: &[u8]) -> Result<ClientHelloInfo, TlsParseError> {
    let mut reader = body;

    // Handshake header (4 bytes)
    let handshake_type = read_u8(&mut reader, "handshake header")?;
    // HandshakeType::ClientHello is 1
    if handshake_type != 1 {
        return Err(TlsParseError::NotClientHello(handshake_type));
    }
    let handshake_len = read_u24(&mut reader, "handshake header")? as usize;
    let mut reader = take(&mut reader, handshake_len, "handshake body")?;

    let mut info = ClientHelloInfo {
        legacy_version: read_u16(&mut reader, "legacy version")?,
        ..Default::default()
    };

    // Random (32 bytes)
    take(&mut reader, 32, "random")?;

    let session_id_len = read_u8(&mut reader, "session id")? as usize;
    let session_id = take(&mut reader, session_id_len, "session id")?;
    if !session_id.is_empty() {
        info.session_id = Some(session_id.to_vec());
    }

    let cipher_suites_len = read_u16(&mut reader, "cipher suites")? as usize;
    let mut suites = take(&mut reader, cipher_suites_len, "cipher suites")?;
    while suites.remaining() >= 2 {
        info.cipher_suites.push(suites.get_u16());
    }

    let compression_len = read_u8(&mut reader, "compression methods")? as usize;
    info.compression_methods = take(&mut reader, compression_len, "compression methods")?.to_vec();

    // Extensions are optional before TLS 1.2
    if !reader.has_remaining() {
        return Ok(info);
    }

    let extensions_len = read_u16(&mut reader, "extensions")? as usize;
    let mut extensions = take(&mut reader, extensions_len, "extensions")?;

    while extensions.has_remaining() {
        let id = read_u16(&mut extensions, "extension header")?;
        let len = read_u16(&mut extensions, "extension header")? as usize;
        let data = take(&mut extensions, len, "extension body")?;
        decode_extension(&mut info, id, data)?;
        info.extensions.push(Extension {
            id,
            data: data.to_vec(),
        });
    }

    Ok(info)
}

fn decode_extension(info: &mut ClientHelloInfo, id: u16, data: &[u8]) -> Result<(), TlsParseError> {
    let mut data = data;
    match id {
        EXT_SERVER_NAME => {
            if !data.has_remaining() {
                return Ok(());
            }
            let list_len = read_u16(&mut data, "server name list")? as usize;
            let mut list = take(&mut data, list_len, "server name list")?;
            while list.has_remaining() {
                let name_type = read_u8(&mut list, "server name")?;
                let name_len = read_u16(&mut list, "server name")? as usize;
                let name = take(&mut list, name_len, "server name")?;
                // name_type 0 is host_name
                if name_type == 0 && info.sni.is_none() {
                    info.sni = std::str::from_utf8(name).ok().map(str::to_string);
                }
            }
        }
        EXT_ALPN => {
            let list_len = read_u16(&mut data, "ALPN list")? as usize;
            let mut list = take(&mut data, list_len, "ALPN list")?;
            while list.has_remaining() {
                let proto_len = read_u8(&mut list, "ALPN protocol")? as usize;
                info.alpn.push(take(&mut list, proto_len, "ALPN protocol")?.to_vec());
            }
        }
        EXT_SUPPORTED_GROUPS => {
            info.supported_groups = read_u16_list(&mut data, "supported groups")?;
        }
        EXT_SIGNATURE_ALGORITHMS => {
            info.signature_algorithms = read_u16_list(&mut data, "signature algorithms")?;
        }
        EXT_EC_POINT_FORMATS => {
            let len = read_u8(&mut data, "point formats")? as usize;
            info.ec_point_formats = take(&mut data, len, "point formats")?.to_vec();
        }
        EXT_SUPPORTED_VERSIONS => {
            let len = read_u8(&mut data, "supported versions")? as usize;
            let mut versions = take(&mut data, len, "supported versions")?;
            while versions.remaining() >= 2 {
                info.supported_versions.push(versions.get_u16());
            }
        }
        _ => {}
    }
    Ok(())
}

fn take<'a>(reader: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8], TlsParseError> {
    if reader.len() < len {
        return Err(TlsParseError::ProtocolError(what));
    }
    let (head, tail) = reader.split_at(len);
    *reader = tail;
    Ok(head)
}

fn read_u8(reader: &mut &[u8], what: &'static str) -> Result<u8, TlsParseError> {
    if reader.remaining() < 1 {
        return Err(TlsParseError::ProtocolError(what));
    }
    Ok(reader.get_u8())
}

fn read_u16(reader: &mut &[u8], what: &'static str) -> Result<u16, TlsParseError> {
    if reader.remaining() < 2 {
        return Err(TlsParseError::ProtocolError(what));
    }
    Ok(reader.get_u16())
}

fn read_u24(reader: &mut &[u8], what: &'static str) -> Result<u32, TlsParseError> {
    let bytes = take(reader, 3, what)?;
    Ok((bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32)
}

fn read_u16_list(reader: &mut &[u8], what: &'static str) -> Result<Vec<u16>, TlsParseError> {
    let len = read_u16(reader, what)? as usize;
    let mut list = take(reader, len, what)?;
    let mut values = Vec::with_capacity(len / 2);
    while list.remaining() >= 2 {
        values.push(list.get_u16());
    }
    Ok(values)
}
