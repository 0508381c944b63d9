use tracing::{debug, info};

use crate::acme::authz::Authorization;
use crate::acme::context::AcmeContext;
use crate::acme::types::Challenge;
use crate::acme::{http01, tls_alpn01, tls_sni01};
use crate::certs::KeySpec;
use crate::error::{AcmeError, Result};
use crate::store::FsStore;

pub const TYPE_HTTP01: &str = "http-01";
pub const TYPE_TLS_ALPN01: &str = "tls-alpn-01";
pub const TYPE_TLS_SNI01: &str = "tls-sni-01";

/// The closed set of challenge types a preparer exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    TlsAlpn01,
    TlsSni01,
}

impl ChallengeKind {
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Http01 => TYPE_HTTP01,
            Self::TlsAlpn01 => TYPE_TLS_ALPN01,
            Self::TlsSni01 => TYPE_TLS_SNI01,
        }
    }

    fn from_type(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case(TYPE_HTTP01) {
            Some(Self::Http01)
        } else if value.eq_ignore_ascii_case(TYPE_TLS_ALPN01) {
            Some(Self::TlsAlpn01)
        } else if value.eq_ignore_ascii_case(TYPE_TLS_SNI01) {
            Some(Self::TlsSni01)
        } else {
            None
        }
    }
}

/// Picks the first caller-preferred challenge type the server offers.
/// Caller order wins over server order; type comparison ignores case.
///
/// # Errors
/// Returns an `invalid`-kind error naming both sets when nothing matches.
pub fn select_challenge(preferred: &[String], offered: &[Challenge]) -> Result<Challenge> {
    for wanted in preferred {
        if let Some(challenge) = offered
            .iter()
            .find(|challenge| challenge.kind.eq_ignore_ascii_case(wanted))
        {
            debug!("Selected challenge type {} at index {}", challenge.kind, challenge.index);
            return Ok(challenge.clone());
        }
    }

    let offered_types: Vec<&str> = offered.iter().map(|c| c.kind.as_str()).collect();
    Err(AcmeError::invalid(format!(
        "No acceptable challenge: server offered {offered_types:?}, configured {preferred:?}"
    )))
}

struct KeyAuthz {
    value: String,
    needs_notify: bool,
}

/// Derives `token.thumbprint` once and decides whether the server must be
/// (re)notified: a missing or stale server-side key authorization means yes.
fn derive_key_authorization(acme: &AcmeContext, challenge: &Challenge) -> Result<KeyAuthz> {
    let computed = acme.account_key().key_authorization(&challenge.token)?;
    let needs_notify = match challenge.key_authz.as_deref() {
        Some(existing) if existing == computed => false,
        Some(_) => {
            debug!("Discarding stale key authorization for token {}", challenge.token);
            true
        }
        None => true,
    };
    Ok(KeyAuthz {
        value: computed,
        needs_notify,
    })
}

/// Responds to the authorization's challenges: selects a mutually acceptable
/// type, materializes and persists its proof artifact, then notifies the
/// server when required. The artifact is persisted before the notify POST so
/// the server never probes into a void.
///
/// # Errors
/// Returns error if no challenge can be selected, the selected type has no
/// preparer, the artifact cannot be produced or stored, or the notify POST
/// fails.
pub async fn respond(
    record: &mut Authorization,
    acme: &mut AcmeContext,
    store: &FsStore,
    preferred: &[String],
    key_spec: KeySpec,
) -> Result<()> {
    let challenge = select_challenge(preferred, &record.challenges())?;
    let kind = ChallengeKind::from_type(&challenge.kind).ok_or_else(|| {
        AcmeError::not_implemented(format!(
            "No preparer available for challenge type {}",
            challenge.kind
        ))
    })?;

    let key_authz = derive_key_authorization(acme, &challenge)?;
    info!(
        "Preparing {} proof for {} (authorization {})",
        kind.type_name(),
        record.domain,
        record.url
    );

    match kind {
        ChallengeKind::Http01 => http01::prepare(record, store, &key_authz.value)?,
        ChallengeKind::TlsAlpn01 => {
            tls_alpn01::prepare(record, store, &key_authz.value, key_spec)?;
        }
        ChallengeKind::TlsSni01 => {
            tls_sni01::prepare(record, store, &key_authz.value, key_spec)?;
        }
    }

    if key_authz.needs_notify {
        notify(acme, &challenge, &key_authz.value).await?;
    } else {
        debug!(
            "Key authorization unchanged; not notifying {}",
            challenge.url
        );
    }
    Ok(())
}

/// Tells the server the proof is in place and verification may start.
async fn notify(acme: &mut AcmeContext, challenge: &Challenge, key_authz: &str) -> Result<()> {
    let mut payload = serde_json::Map::new();
    if acme.version() == 1 {
        payload.insert("resource".to_string(), "challenge".into());
    }
    payload.insert("keyAuthorization".to_string(), key_authz.into());

    info!("Notifying server that challenge at {} is ready", challenge.url);
    acme.post(&challenge.url, &serde_json::Value::Object(payload))
        .await?;
    Ok(())
}
