use tracing::{debug, info};

use crate::acme::authz::Authorization;
use crate::error::Result;
use crate::store::{BlobKind, FsStore, GROUP_CHALLENGES};

const FILE_HTTP01: &str = "http-01";

/// Persists the raw key authorization under `(challenges, domain, http-01)`
/// for the out-of-process HTTP responder to serve. Overwrites only when the
/// stored value is missing or different.
pub(crate) fn prepare(record: &mut Authorization, store: &FsStore, key_authz: &str) -> Result<()> {
    let existing = store.load(GROUP_CHALLENGES, &record.domain, FILE_HTTP01, BlobKind::Text)?;
    if existing.as_deref() == Some(key_authz.as_bytes()) {
        debug!("HTTP-01 artifact for {} is current", record.domain);
    } else {
        store.save(
            GROUP_CHALLENGES,
            &record.domain,
            FILE_HTTP01,
            BlobKind::Text,
            key_authz.as_bytes(),
        )?;
        info!("Stored HTTP-01 key authorization for {}", record.domain);
    }

    record.dir = Some(record.domain.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::acme::challenge::respond;
    use crate::acme::context::AcmeContext;
    use crate::acme::types::AuthzState;
    use crate::certs::KeySpec;
    use crate::jws::AccountKey;

    async fn mount_protocol(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/directory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "new-authz": format!("{}/acme/new-authz", server.uri()),
                "new-cert": format!("{}/acme/new-cert", server.uri()),
                "new-reg": format!("{}/acme/new-reg", server.uri()),
                "revoke-cert": format!("{}/acme/revoke-cert", server.uri()),
            })))
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/acme/new-reg"))
            .respond_with(ResponseTemplate::new(200).insert_header("replay-nonce", "nonce-1"))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chal/0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("replay-nonce", "nonce-2")
                    .set_body_json(serde_json::json!({"status": "pending"})),
            )
            .mount(server)
            .await;
    }

    fn record_with_challenge(server: &MockServer, key_authz: Option<&str>) -> Authorization {
        let mut challenge = serde_json::json!({
            "type": "http-01",
            "uri": format!("{}/chal/0", server.uri()),
            "token": "TOK",
        });
        if let Some(value) = key_authz {
            challenge["keyAuthorization"] = serde_json::Value::String(value.to_string());
        }
        Authorization {
            domain: "example.org".to_string(),
            url: "https://ca.example/authz/abc".to_string(),
            dir: None,
            state: AuthzState::Pending,
            resource: Some(serde_json::json!({"challenges": [challenge]})),
        }
    }

    async fn notify_count(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|req| req.method.as_str() == "POST" && req.url.path() == "/chal/0")
            .count()
    }

    #[tokio::test]
    async fn test_respond_writes_artifact_then_notifies() {
        let server = MockServer::start().await;
        mount_protocol(&server).await;

        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let key = AccountKey::generate().unwrap();
        let mut acme = AcmeContext::new(format!("{}/directory", server.uri()), key, 1).unwrap();
        let mut record = record_with_challenge(&server, None);

        respond(
            &mut record,
            &mut acme,
            &store,
            &["http-01".to_string()],
            KeySpec::default(),
        )
        .await
        .unwrap();

        let expected = acme.account_key().key_authorization("TOK").unwrap();
        let stored = store
            .load(GROUP_CHALLENGES, "example.org", FILE_HTTP01, BlobKind::Text)
            .unwrap();
        assert_eq!(stored.as_deref(), Some(expected.as_bytes()));
        assert_eq!(record.dir.as_deref(), Some("example.org"));
        assert_eq!(notify_count(&server).await, 1);

        let notify = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .find(|req| req.method.as_str() == "POST" && req.url.path() == "/chal/0")
            .unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&notify.body).unwrap();
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(envelope["payload"].as_str().unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(payload["resource"], "challenge");
        assert_eq!(payload["keyAuthorization"], expected.as_str());
    }

    #[tokio::test]
    async fn test_respond_with_fresh_artifact_skips_notify() {
        let server = MockServer::start().await;
        mount_protocol(&server).await;

        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let key = AccountKey::generate().unwrap();
        let mut acme = AcmeContext::new(format!("{}/directory", server.uri()), key, 1).unwrap();

        let key_authz = acme.account_key().key_authorization("TOK").unwrap();
        store
            .save(
                GROUP_CHALLENGES,
                "example.org",
                FILE_HTTP01,
                BlobKind::Text,
                key_authz.as_bytes(),
            )
            .unwrap();

        // The server already knows this key authorization.
        let mut record = record_with_challenge(&server, Some(&key_authz));
        respond(
            &mut record,
            &mut acme,
            &store,
            &["http-01".to_string()],
            KeySpec::default(),
        )
        .await
        .unwrap();

        assert_eq!(notify_count(&server).await, 0);
        assert_eq!(record.dir.as_deref(), Some("example.org"));
    }

    #[tokio::test]
    async fn test_respond_renotifies_on_stale_key_authorization() {
        let server = MockServer::start().await;
        mount_protocol(&server).await;

        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let key = AccountKey::generate().unwrap();
        let mut acme = AcmeContext::new(format!("{}/directory", server.uri()), key, 1).unwrap();

        store
            .save(
                GROUP_CHALLENGES,
                "example.org",
                FILE_HTTP01,
                BlobKind::Text,
                b"TOK.outdated-thumbprint",
            )
            .unwrap();

        let mut record = record_with_challenge(&server, Some("TOK.outdated-thumbprint"));
        respond(
            &mut record,
            &mut acme,
            &store,
            &["http-01".to_string()],
            KeySpec::default(),
        )
        .await
        .unwrap();

        let expected = acme.account_key().key_authorization("TOK").unwrap();
        let stored = store
            .load(GROUP_CHALLENGES, "example.org", FILE_HTTP01, BlobKind::Text)
            .unwrap();
        assert_eq!(stored.as_deref(), Some(expected.as_bytes()));
        assert_eq!(notify_count(&server).await, 1);
    }
}
