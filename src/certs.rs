use rcgen::{
    CertificateParams, CustomExtension, DnType, KeyPair, PKCS_ECDSA_P256_SHA256,
    PKCS_ECDSA_P384_SHA384,
};
use ring::digest::{SHA256, digest};
use time::{Duration, OffsetDateTime};

use crate::error::{AcmeError, Result};

/// Key algorithm for throwaway challenge certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySpec {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeySpec {
    fn algorithm(self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        }
    }
}

/// A freshly generated key pair and its self-signed certificate, PEM-encoded.
#[derive(Debug, Clone)]
pub struct CertArtifact {
    pub key_pem: String,
    pub cert_pem: String,
}

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    digest(&SHA256, data).as_ref().to_vec()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    sha256(data)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn build_self_signed(
    subject: &str,
    sans: Vec<String>,
    acme_digest: Option<&[u8]>,
    valid_days: i64,
    spec: KeySpec,
) -> Result<CertArtifact> {
    let mut params = CertificateParams::new(sans)?;
    params
        .distinguished_name
        .push(DnType::CommonName, subject.to_string());

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(valid_days);

    if let Some(digest) = acme_digest {
        if digest.len() != 32 {
            return Err(AcmeError::general(
                "acmeIdentifier digest must be 32 bytes",
            ));
        }
        params.custom_extensions = vec![CustomExtension::new_acme_identifier(digest)];
    }

    let key_pair = KeyPair::generate_for(spec.algorithm())?;
    let cert = params.self_signed(&key_pair)?;

    Ok(CertArtifact {
        key_pem: key_pair.serialize_pem(),
        cert_pem: cert.pem(),
    })
}

/// Self-signs a certificate with the given subject and SAN list.
///
/// # Errors
/// Returns error if key generation or signing fails.
pub fn self_signed(
    subject: &str,
    sans: &[String],
    valid_days: i64,
    spec: KeySpec,
) -> Result<CertArtifact> {
    build_self_signed(subject, sans.to_vec(), None, valid_days, spec)
}

/// Self-signs a certificate covering `domain` that carries the critical
/// `acmeIdentifier` extension with the SHA-256 digest of the key
/// authorization.
///
/// # Errors
/// Returns error if the digest has the wrong length or signing fails.
pub fn self_signed_acme_identifier(
    domain: &str,
    key_authz_digest: &[u8],
    valid_days: i64,
    spec: KeySpec,
) -> Result<CertArtifact> {
    build_self_signed(
        domain,
        vec![domain.to_string()],
        Some(key_authz_digest),
        valid_days,
        spec,
    )
}

/// Checks whether a PEM certificate covers `domain` via its SAN list or,
/// failing that, its subject common name. Unparseable input is "not covered".
#[must_use]
pub fn cert_covers_domain(cert_pem: &[u8], domain: &str) -> bool {
    let Ok((_, pem)) = x509_parser::pem::parse_x509_pem(cert_pem) else {
        return false;
    };
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(&pem.contents) else {
        return false;
    };

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                if dns.eq_ignore_ascii_case(domain) {
                    return true;
                }
            }
        }
    }

    cert.subject()
        .iter_common_name()
        .any(|cn| cn.as_str().is_ok_and(|value| value.eq_ignore_ascii_case(domain)))
}
