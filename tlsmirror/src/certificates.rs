//! Certificate loading utilities.
//!
//! Loads the operator CA, the optional mutual-TLS client credentials and the
//! upstream trust store using the boring (BoringSSL) library.

use crate::error::{CertificateError, MirrorError, Result};
use boring::pkey::{PKey, Private};
use boring::x509::store::{X509Store, X509StoreBuilder};
use boring::x509::X509;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loads the PEM certificate at `path`.
///
/// ### Arguments
/// - `path` - CA or client certificate file.
pub fn load_certificate_from_file(path: &Path) -> Result<X509> {
    let load_failed = || CertificateError::LoadFailed {
        path: path.to_path_buf(),
    };
    let pem_data = fs::read(path).map_err(|_| load_failed())?;
    Ok(X509::from_pem(&pem_data).map_err(|_| load_failed())?)
}

/// Parses one inline PEM certificate, as given in `trusted_certificates`.
pub fn load_certificate_from_pem(pem_data: &str) -> Result<X509> {
    X509::from_pem(pem_data.as_bytes()).map_err(|_| CertificateError::UnsupportedFormat.into())
}

/// Loads the PEM private key (PKCS#8, SEC1 or PKCS#1) at `path`.
pub fn load_private_key_from_file(path: &Path) -> Result<PKey<Private>> {
    let load_failed = || CertificateError::PrivateKeyLoadFailed {
        path: path.to_path_buf(),
    };
    let pem_data = fs::read(path).map_err(|_| load_failed())?;
    Ok(PKey::private_key_from_pem(&pem_data).map_err(|_| load_failed())?)
}

/// Client certificate presented to one specific upstream host.
#[derive(Clone)]
pub struct ClientCredentials {
    pub host: String,
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl ClientCredentials {
    pub fn from_files(host: &str, certificate_file: &Path, key_file: &Path) -> Result<Self> {
        Ok(Self {
            host: host.to_string(),
            certificate: load_certificate_from_file(certificate_file)?,
            private_key: load_private_key_from_file(key_file)?,
        })
    }

    /// Whether these credentials apply to the given upstream server name.
    pub fn matches(&self, server_name: &str) -> bool {
        !server_name.is_empty() && self.host.eq_ignore_ascii_case(server_name)
    }
}

/// Root certificates trusted when verifying upstream servers.
///
/// Built into one `X509Store` at startup; every per-connection connector
/// shares it by reference.
pub struct TrustStore {
    store: X509Store,
    len: usize,
}

impl TrustStore {
    /// Builds a store from the system roots plus the configured extras.
    pub fn load(extra_paths: &[PathBuf], extra_pems: &[String]) -> Result<Self> {
        let mut roots = Vec::new();

        // BoringSSL doesn't load platform keychains by default
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            warn!("Errors loading native certs: {:?}", native_certs.errors);
        }
        for cert in &native_certs.certs {
            if let Ok(x509) = X509::from_der(cert.as_ref()) {
                roots.push(x509);
            }
        }
        info!("Loaded {} system root certificates", roots.len());

        for path in extra_paths {
            let pem = fs::read(path).map_err(|_| CertificateError::LoadFailed { path: path.clone() })?;
            let certs = X509::stack_from_pem(&pem).map_err(|e| {
                MirrorError::config_error(format!("Failed to load CA file {:?}: {}", path, e))
            })?;
            roots.extend(certs);
        }
        for pem in extra_pems {
            roots.push(load_certificate_from_pem(pem)?);
        }

        Self::from_roots(roots)
    }

    /// A store holding only the given roots.
    pub fn from_roots(roots: Vec<X509>) -> Result<Self> {
        let mut builder = X509StoreBuilder::new()?;
        let mut len = 0;
        for root in roots {
            match builder.add_cert(root) {
                Ok(()) => len += 1,
                Err(e) => debug!("Skipping root certificate: {}", e),
            }
        }
        Ok(Self {
            store: builder.build(),
            len,
        })
    }

    pub fn cert_store(&self) -> &X509Store {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boring::asn1::Asn1Time;
    use boring::ec::{EcGroup, EcKey};
    use boring::hash::MessageDigest;
    use boring::nid::Nid;
    use boring::x509::{X509Builder, X509NameBuilder};

    fn self_signed(common_name: &str) -> X509 {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_roots_counted_once_built() {
        let store = TrustStore::from_roots(vec![self_signed("root a"), self_signed("root b")]).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
        assert!(TrustStore::from_roots(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pem_is_rejected() {
        assert!(matches!(
            load_certificate_from_pem("not a certificate"),
            Err(MirrorError::Certificate(CertificateError::UnsupportedFormat))
        ));
    }

    #[test]
    fn test_missing_files_report_path() {
        let path = Path::new("/nonexistent/ca.pem");
        match load_certificate_from_file(path) {
            Err(MirrorError::Certificate(CertificateError::LoadFailed { path: p })) => {
                assert_eq!(p, path)
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            load_private_key_from_file(path),
            Err(MirrorError::Certificate(CertificateError::PrivateKeyLoadFailed { .. }))
        ));
    }
}
