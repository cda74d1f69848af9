pub mod tracing;

use std::io;

/// Returns true for I/O errors that only mean the peer or our own close
/// already tore the connection down.
pub fn is_closed_conn_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
