use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use boring::ssl::SslContextBuilder;
use tracing::warn;

use crate::error::{ConfigError, Result};

/// Appends NSS key-log lines for both TLS legs to one file.
pub struct KeyLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl KeyLogWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|_| ConfigError::KeyLogUnavailable {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&self, line: &str) {
        let Ok(mut file) = self.file.lock() else {
            warn!("Key log writer poisoned, dropping line");
            return;
        };
        if let Err(e) = writeln!(file, "{line}") {
            warn!("Failed to write key log {:?}: {}", self.path, e);
        }
    }
}

/// Installs `writer` as the key-log sink of a connector or acceptor.
pub fn install(builder: &mut SslContextBuilder, writer: std::sync::Arc<KeyLogWriter>) {
    builder.set_keylog_callback(move |_, line| writer.write_line(line));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_lines() {
        let path = std::env::temp_dir().join(format!("tlsmirror-keylog-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let writer = KeyLogWriter::open(&path).unwrap();
        writer.write_line("CLIENT_RANDOM 00 11");
        drop(writer);

        let writer = KeyLogWriter::open(&path).unwrap();
        writer.write_line("CLIENT_RANDOM 22 33");

        let contents = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(contents, "CLIENT_RANDOM 00 11\nCLIENT_RANDOM 22 33\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_path() {
        assert!(KeyLogWriter::open(Path::new("/nonexistent/dir/ssl.log")).is_err());
    }
}
