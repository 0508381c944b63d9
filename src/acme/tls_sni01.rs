use tracing::info;

use crate::acme::authz::Authorization;
use crate::certs::{self, KeySpec};
use crate::error::Result;
use crate::store::{BlobKind, FsStore, GROUP_CHALLENGES};

const FILE_KEY: &str = "tls-sni-01.key";
const FILE_CERT: &str = "tls-sni-01.crt";
const DNS_SUFFIX: &str = "acme.invalid";
const VALID_DAYS: i64 = 7;

/// Challenge hostname derived from the key authorization: the lowercase hex
/// SHA-256, split 32/32, under the fixed `.acme.invalid` suffix.
pub(crate) fn challenge_dns_name(key_authz: &str) -> String {
    let hex = certs::sha256_hex(key_authz.as_bytes());
    format!("{}.{}.{DNS_SUFFIX}", &hex[..32], &hex[32..64])
}

/// Generates and persists the TLS-SNI-01 proof: a self-signed certificate
/// with the domain as subject and the derived challenge hostname in its SAN
/// list, stored under the derived hostname.
pub(crate) fn prepare(
    record: &mut Authorization,
    store: &FsStore,
    key_authz: &str,
    key_spec: KeySpec,
) -> Result<()> {
    let dns = challenge_dns_name(key_authz);
    let artifact = certs::self_signed(&record.domain, &[dns.clone()], VALID_DAYS, key_spec)?;

    store.save(
        GROUP_CHALLENGES,
        &dns,
        FILE_KEY,
        BlobKind::Key,
        artifact.key_pem.as_bytes(),
    )?;
    store.save(
        GROUP_CHALLENGES,
        &dns,
        FILE_CERT,
        BlobKind::Cert,
        artifact.cert_pem.as_bytes(),
    )?;
    info!(
        "Stored TLS-SNI-01 certificate for {} under {dns}",
        record.domain
    );

    record.dir = Some(dns);
    Ok(())
}
