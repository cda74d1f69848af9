//! CONNECT request head parsing.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{MAX_REQUEST_HEADERS, MAX_REQUEST_HEAD_SIZE};
use crate::error::{NetworkError, Result};
use crate::hijack::TargetAddr;

pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";
pub const METHOD_NOT_ALLOWED_RESPONSE: &[u8] =
    b"HTTP/1.1 405 Method Not Allowed\r\nAllow: CONNECT\r\nConnection: close\r\n\r\n";

/// Why a request head was refused, and what to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BadRequest(String),
    MethodNotAllowed(String),
}

impl Rejection {
    pub fn response(&self) -> &'static [u8] {
        match self {
            Rejection::BadRequest(_) => BAD_REQUEST_RESPONSE,
            Rejection::MethodNotAllowed(_) => METHOD_NOT_ALLOWED_RESPONSE,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Rejection::BadRequest(reason) | Rejection::MethodNotAllowed(reason) => reason,
        }
    }
}

/// A parsed head plus any bytes the client sent after it.
pub struct ConnectRequest {
    pub target: TargetAddr,
    pub leftover: Vec<u8>,
}

/// Reads up to the end of the request head, bounded by `MAX_REQUEST_HEAD_SIZE`.
///
/// `Ok(Err(..))` is a request that must be answered with the rejection's response.
pub async fn read_connect_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<std::result::Result<ConnectRequest, Rejection>> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD_SIZE];
    let mut pos = 0usize;

    loop {
        match parse_head(&buf[..pos]) {
            Ok(Some((head_len, target))) => {
                let leftover = buf[head_len..pos].to_vec();
                return Ok(Ok(ConnectRequest { target, leftover }));
            }
            Ok(None) => {}
            Err(rejection) => return Ok(Err(rejection)),
        }
        if pos >= MAX_REQUEST_HEAD_SIZE {
            return Ok(Err(Rejection::BadRequest(format!(
                "request head exceeds {MAX_REQUEST_HEAD_SIZE} bytes"
            ))));
        }

        let n = reader.read(&mut buf[pos..]).await?;
        if n == 0 {
            return Err(NetworkError::ConnectionClosed.into());
        }
        pos += n;
    }
}

/// Parses a possibly incomplete head. `Ok(None)` means more bytes are needed.
fn parse_head(buf: &[u8]) -> std::result::Result<Option<(usize, TargetAddr)>, Rejection> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let head_len = match request.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => head_len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Rejection::BadRequest(format!("malformed request head: {e}"))),
    };

    let method = request.method.unwrap_or_default();
    if !method.eq_ignore_ascii_case("CONNECT") {
        return Err(Rejection::MethodNotAllowed(format!("method '{method}'")));
    }

    let authority = request.path.unwrap_or_default();
    let target = TargetAddr::parse(authority)
        .map_err(|_| Rejection::BadRequest(format!("invalid authority '{authority}'")))?;

    Ok(Some((head_len, target)))
}

/// Parses `CONNECT host:port HTTP/1.x` from a complete request head.
pub fn parse_connect_head(head: &[u8]) -> std::result::Result<TargetAddr, Rejection> {
    parse_head(head)?
        .map(|(_, target)| target)
        .ok_or_else(|| Rejection::BadRequest("incomplete request head".to_string()))
}

impl From<Rejection> for NetworkError {
    fn from(rejection: Rejection) -> Self {
        NetworkError::BadRequest {
            reason: rejection.reason().to_string(),
        }
    }
}
