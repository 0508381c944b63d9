use tracing::{debug, info};

use crate::acme::authz::Authorization;
use crate::certs::{self, KeySpec};
use crate::error::Result;
use crate::store::{BlobKind, FsStore, GROUP_CHALLENGES};

const FILE_KEY: &str = "tls-alpn-01.key";
const FILE_CERT: &str = "tls-alpn-01.crt";
const VALID_DAYS: i64 = 7;

/// Generates and persists the TLS-ALPN-01 proof: a self-signed certificate
/// for the domain carrying the critical `acmeIdentifier` extension with the
/// SHA-256 digest of the key authorization. An existing certificate is kept
/// as long as it still covers the domain.
pub(crate) fn prepare(
    record: &mut Authorization,
    store: &FsStore,
    key_authz: &str,
    key_spec: KeySpec,
) -> Result<()> {
    let domain = record.domain.clone();
    let existing = store.load(GROUP_CHALLENGES, &domain, FILE_CERT, BlobKind::Cert)?;
    let current = existing
        .as_deref()
        .is_some_and(|pem| certs::cert_covers_domain(pem, &domain));

    if current {
        debug!("TLS-ALPN-01 certificate for {domain} is current");
    } else {
        let digest = certs::sha256(key_authz.as_bytes());
        let artifact = certs::self_signed_acme_identifier(&domain, &digest, VALID_DAYS, key_spec)?;
        store.save(
            GROUP_CHALLENGES,
            &domain,
            FILE_KEY,
            BlobKind::Key,
            artifact.key_pem.as_bytes(),
        )?;
        store.save(
            GROUP_CHALLENGES,
            &domain,
            FILE_CERT,
            BlobKind::Cert,
            artifact.cert_pem.as_bytes(),
        )?;
        info!("Stored TLS-ALPN-01 certificate for {domain}");
    }

    record.dir = Some(domain);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::acme::types::AuthzState;
    use crate::certs::cert_covers_domain;

    fn record() -> Authorization {
        Authorization {
            domain: "www.example.com".to_string(),
            url: "https://ca.example/authz/abc".to_string(),
            dir: None,
            state: AuthzState::Pending,
            resource: None,
        }
    }

    #[test]
    fn test_prepare_generates_key_and_cert() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let mut record = record();

        prepare(&mut record, &store, "TOK.THP", KeySpec::default()).unwrap();

        assert_eq!(record.dir.as_deref(), Some("www.example.com"));
        let key = store
            .load(GROUP_CHALLENGES, "www.example.com", FILE_KEY, BlobKind::Key)
            .unwrap()
            .expect("key must be stored");
        assert!(String::from_utf8(key).unwrap().contains("PRIVATE KEY"));

        let cert = store
            .load(GROUP_CHALLENGES, "www.example.com", FILE_CERT, BlobKind::Cert)
            .unwrap()
            .expect("cert must be stored");
        assert!(cert_covers_domain(&cert, "www.example.com"));
    }

    #[test]
    fn test_prepare_keeps_covering_cert() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let mut record = record();

        prepare(&mut record, &store, "TOK.THP", KeySpec::default()).unwrap();
        let first = store
            .load(GROUP_CHALLENGES, "www.example.com", FILE_CERT, BlobKind::Cert)
            .unwrap()
            .expect("cert must be stored");

        prepare(&mut record, &store, "TOK.THP", KeySpec::default()).unwrap();
        let second = store
            .load(GROUP_CHALLENGES, "www.example.com", FILE_CERT, BlobKind::Cert)
            .unwrap()
            .expect("cert must still be stored");

        // Unchanged bytes: the covering certificate was not regenerated.
        assert_eq!(first, second);
    }

    #[test]
    fn test_prepare_replaces_cert_for_other_domain() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());

        // Seed the entry with a certificate for a different name.
        let foreign = crate::certs::self_signed(
            "other.example",
            &["other.example".to_string()],
            7,
            KeySpec::default(),
        )
        .unwrap();
        store
            .save(
                GROUP_CHALLENGES,
                "www.example.com",
                FILE_CERT,
                BlobKind::Cert,
                foreign.cert_pem.as_bytes(),
            )
            .unwrap();

        let mut record = record();
        prepare(&mut record, &store, "TOK.THP", KeySpec::default()).unwrap();

        let cert = store
            .load(GROUP_CHALLENGES, "www.example.com", FILE_CERT, BlobKind::Cert)
            .unwrap()
            .expect("cert must be stored");
        assert!(cert_covers_domain(&cert, "www.example.com"));
    }
}
