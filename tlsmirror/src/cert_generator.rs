//! Leaf certificate issuance.
//!
//! Every intercepted connection gets a fresh, short-lived leaf signed by the
//! operator CA. The generator holds only immutable CA material and can be
//! shared between any number of tasks.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use boring::asn1::Asn1Time;
use boring::bn::{BigNum, MsbOption};
use boring::ec::{EcGroup, EcKey};
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::{PKey, Private};
use boring::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use boring::x509::{X509Builder, X509NameBuilder, X509};
use tracing::debug;

use crate::certificates::{load_certificate_from_file, load_private_key_from_file};
use crate::constants::{LEAF_BACKDATE_DAYS, LEAF_ORGANIZATION, LEAF_VALIDITY_DAYS};
use crate::error::{CertificateError, Result};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Identities a leaf certificate must cover.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafCertificateRequest {
    pub ip_addresses: BTreeSet<IpAddr>,
    pub dns_names: BTreeSet<String>,
}

impl LeafCertificateRequest {
    pub fn for_dns_name(name: impl Into<String>) -> Self {
        Self {
            dns_names: BTreeSet::from([name.into()]),
            ..Default::default()
        }
    }

    pub fn for_ip(ip: IpAddr) -> Self {
        Self {
            ip_addresses: BTreeSet::from([ip]),
            ..Default::default()
        }
    }

    /// IP SAN when `identity` is an IP literal, DNS SAN otherwise.
    pub fn for_identity(identity: &str) -> Self {
        match identity.parse::<IpAddr>() {
            Ok(ip) => Self::for_ip(ip),
            Err(_) => Self::for_dns_name(identity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ip_addresses.is_empty() && self.dns_names.is_empty()
    }

    fn common_name(&self) -> String {
        self.dns_names
            .iter()
            .next()
            .cloned()
            .or_else(|| self.ip_addresses.iter().next().map(IpAddr::to_string))
            .unwrap_or_default()
    }
}

/// A leaf certificate and its key, owned by a single TLS session.
pub struct IssuedCertificate {
    pub certificate: X509,
    pub private_key: PKey<Private>,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

/// Mints leaf certificates signed by the operator CA.
pub struct CertificateGenerator {
    ca_certificate: X509,
    ca_key: PKey<Private>,
}

impl CertificateGenerator {
    pub fn new(ca_certificate: X509, ca_key: PKey<Private>) -> Self {
        Self {
            ca_certificate,
            ca_key,
        }
    }

    /// Loads the CA certificate and key from PEM files.
    pub fn from_files(certificate_file: &Path, key_file: &Path) -> Result<Self> {
        let ca_certificate = load_certificate_from_file(certificate_file)?;
        let ca_key = load_private_key_from_file(key_file)?;
        Ok(Self::new(ca_certificate, ca_key))
    }

    pub fn ca_certificate(&self) -> &X509 {
        &self.ca_certificate
    }

    /// Issues a leaf covering exactly the requested identities.
    pub fn generate_child(&self, request: &LeafCertificateRequest) -> Result<IssuedCertificate> {
        if request.is_empty() {
            return Err(CertificateError::EmptyRequest.into());
        }

        self.build_leaf(request).map_err(|e| {
            CertificateError::GenerationFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn build_leaf(
        &self,
        request: &LeafCertificateRequest,
    ) -> std::result::Result<IssuedCertificate, boring::error::ErrorStack> {
        let now = SystemTime::now();
        let not_before = now - Duration::from_secs(LEAF_BACKDATE_DAYS * SECONDS_PER_DAY);
        let not_after = now + Duration::from_secs(LEAF_VALIDITY_DAYS * SECONDS_PER_DAY);

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let private_key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;

        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        builder.set_serial_number(&serial.to_asn1_integer()?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, LEAF_ORGANIZATION)?;
        let common_name = request.common_name();
        if !common_name.is_empty() && common_name.len() <= 64 {
            name.append_entry_by_nid(Nid::COMMONNAME, &common_name)?;
        }
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.ca_certificate.subject_name())?;

        builder.set_not_before(&Asn1Time::from_unix(unix_seconds(not_before) as _)?)?;
        builder.set_not_after(&Asn1Time::from_unix(unix_seconds(not_after) as _)?)?;
        builder.set_pubkey(&private_key)?;

        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

        let mut san = SubjectAlternativeName::new();
        for dns_name in &request.dns_names {
            san.dns(dns_name);
        }
        for ip in &request.ip_addresses {
            san.ip(&ip.to_string());
        }
        let san = san.build(&builder.x509v3_context(Some(&*self.ca_certificate), None))?;
        builder.append_extension(san)?;

        builder.sign(&self.ca_key, MessageDigest::sha256())?;

        debug!(
            "Issued leaf certificate for names={:?} ips={:?}",
            request.dns_names, request.ip_addresses
        );

        Ok(IssuedCertificate {
            certificate: builder.build(),
            private_key,
            not_before,
            not_after,
        })
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use boring::x509::X509Ref;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn test_generator() -> CertificateGenerator {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "tlsmirror test CA")
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

        CertificateGenerator::new(builder.build(), key)
    }

    fn san_entries(cert: &X509Ref) -> (HashSet<String>, HashSet<Vec<u8>>) {
        let mut names = HashSet::new();
        let mut ips = HashSet::new();
        for entry in cert.subject_alt_names().unwrap().iter() {
            if let Some(name) = entry.dnsname() {
                names.insert(name.to_string());
            }
            if let Some(ip) = entry.ipaddress() {
                ips.insert(ip.to_vec());
            }
        }
        (names, ips)
    }

    #[test]
    fn test_dns_leaf_san_matches_request() {
        let generator = test_generator();
        let issued = generator
            .generate_child(&LeafCertificateRequest::for_dns_name("example.com"))
            .unwrap();

        let (names, ips) = san_entries(&issued.certificate);
        assert_eq!(names, HashSet::from(["example.com".to_string()]));
        assert!(ips.is_empty());
    }

    #[test]
    fn test_ip_leaf_san_matches_request() {
        let generator = test_generator();
        let request = LeafCertificateRequest::for_identity("93.184.216.34");
        assert_eq!(
            request.ip_addresses,
            BTreeSet::from([IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))])
        );

        let issued = generator.generate_child(&request).unwrap();
        let (names, ips) = san_entries(&issued.certificate);
        assert!(names.is_empty());
        assert_eq!(ips, HashSet::from([vec![93, 184, 216, 34]]));
    }

    #[test]
    fn test_validity_window() {
        let generator = test_generator();
        let issued_at = SystemTime::now();
        let issued = generator
            .generate_child(&LeafCertificateRequest::for_dns_name("example.com"))
            .unwrap();

        assert!(issued.not_before <= issued_at);
        assert!(issued_at <= issued.not_after);

        let window = issued.not_after.duration_since(issued.not_before).unwrap();
        // 13 months, counted generously as 31 days each
        assert!(window <= Duration::from_secs(13 * 31 * SECONDS_PER_DAY));
        assert!(window >= Duration::from_secs(320 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_leaf_is_signed_by_ca() {
        let generator = test_generator();
        let issued = generator
            .generate_child(&LeafCertificateRequest::for_dns_name("signed.example"))
            .unwrap();

        let ca_key = generator.ca_certificate().public_key().unwrap();
        assert!(issued.certificate.verify(&ca_key).unwrap());
    }

    #[test]
    fn test_serials_differ() {
        let generator = test_generator();
        let request = LeafCertificateRequest::for_dns_name("example.com");
        let a = generator.generate_child(&request).unwrap();
        let b = generator.generate_child(&request).unwrap();

        let serial_a = a.certificate.serial_number().to_bn().unwrap().to_vec();
        let serial_b = b.certificate.serial_number().to_bn().unwrap().to_vec();
        assert_ne!(serial_a, serial_b);
    }

    #[test]
    fn test_empty_request_is_rejected() {
        let generator = test_generator();
        assert!(matches!(
            generator.generate_child(&LeafCertificateRequest::default()),
            Err(crate::MirrorError::Certificate(CertificateError::EmptyRequest))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_issuance() {
        let generator = Arc::new(test_generator());
        let mut handles = Vec::new();
        for i in 0..16 {
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("host{i}.example");
                let issued = generator
                    .generate_child(&LeafCertificateRequest::for_dns_name(&name))
                    .unwrap();
                (name, issued)
            }));
        }

        for handle in handles {
            let (name, issued) = handle.await.unwrap();
            let (names, _) = san_entries(&issued.certificate);
            assert_eq!(names, HashSet::from([name]));
        }
    }
}
