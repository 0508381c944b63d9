use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::acme::authz::Authorization;
use crate::acme::challenge;
use crate::acme::context::AcmeContext;
use crate::acme::types::AuthzState;
use crate::certs::KeySpec;
use crate::config::Settings;
use crate::jws::AccountKey;
use crate::store::FsStore;

async fn load_account_key(settings: &Settings) -> Result<AccountKey> {
    if let Some(path) = &settings.account_key {
        let der = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read account key {}", path.display()))?;
        return Ok(AccountKey::from_pkcs8(&der)?);
    }
    info!("Generating ephemeral account key");
    Ok(AccountKey::generate()?)
}

pub(crate) fn parse_duration_setting(value: &str, label: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| anyhow::anyhow!("Invalid {label} value '{value}': {e}"))
}

/// Drives one domain authorization end to end: register, poll once for the
/// offered challenges, prepare and announce the proof, then poll until the
/// server reaches a terminal state.
///
/// # Errors
/// Returns error if any protocol step fails, the authorization turns
/// invalid, or it is still pending when the poll budget runs out.
pub async fn authorize_domain(settings: &Settings, domain: &str) -> Result<Authorization> {
    let account_key = load_account_key(settings).await?;
    let mut acme = AcmeContext::new(settings.server.clone(), account_key, settings.acme.version)?;
    let store = FsStore::new(&settings.store_dir);

    let mut authz = Authorization::register(&mut acme, domain).await?;
    authz.update(&mut acme).await?;

    if authz.state == AuthzState::Valid {
        info!("Authorization for {} is already valid", authz.domain);
        return Ok(authz);
    }

    challenge::respond(
        &mut authz,
        &mut acme,
        &store,
        &settings.acme.challenges,
        KeySpec::default(),
    )
    .await?;

    wait_for_validation(&mut authz, &mut acme, settings).await?;
    Ok(authz)
}

/// Asks the authority to deactivate a previously registered authorization.
///
/// # Errors
/// Returns error if the account key cannot be loaded or the request fails.
pub async fn deactivate_authorization(settings: &Settings, authz: &Authorization) -> Result<()> {
    let account_key = load_account_key(settings).await?;
    let mut acme = AcmeContext::new(settings.server.clone(), account_key, settings.acme.version)?;
    authz.deactivate(&mut acme).await?;
    Ok(())
}

async fn wait_for_validation(
    authz: &mut Authorization,
    acme: &mut AcmeContext,
    settings: &Settings,
) -> Result<()> {
    let interval = parse_duration_setting(&settings.acme.poll_interval, "poll_interval")?;

    for attempt in 1..=settings.acme.poll_attempts {
        tokio::time::sleep(interval).await;
        debug!("Polling authorization (attempt {attempt})...");
        authz.update(acme).await?;
        match authz.state {
            AuthzState::Valid => {
                info!("Authorization for {} validated", authz.domain);
                return Ok(());
            }
            AuthzState::Invalid => {
                anyhow::bail!("Authorization for {} failed validation", authz.domain)
            }
            AuthzState::Pending | AuthzState::Unknown => {}
        }
    }

    anyhow::bail!(
        "Authorization for {} still pending after {} attempts",
        authz.domain,
        settings.acme.poll_attempts
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use super::*;
    use crate::config::AcmeSettings;

    struct AuthzProgression {
        polls: Arc<AtomicUsize>,
        pending_body: serde_json::Value,
        final_body: serde_json::Value,
    }

    impl Respond for AuthzProgression {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            if poll == 0 {
                ResponseTemplate::new(200).set_body_json(&self.pending_body)
            } else {
                ResponseTemplate::new(200).set_body_json(&self.final_body)
            }
        }
    }

    fn test_settings(server: &MockServer, store_dir: &std::path::Path) -> Settings {
        Settings {
            server: format!("{}/directory", server.uri()),
            store_dir: store_dir.to_path_buf(),
            account_key: None,
            acme: AcmeSettings {
                version: 1,
                challenges: vec!["http-01".to_string()],
                poll_attempts: 5,
                poll_interval: "0s".to_string(),
            },
        }
    }

    async fn mount_scenario(server: &MockServer, final_status: &str) {
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
            .respond_with(ResponseTemplate::new(200).insert_header("replay-nonce", "nonce-0"))
            .mount(server)
            .await;

        let pending_body = serde_json::json!({
            "status": "pending",
            "identifier": {"type": "dns", "value": "www.example.com"},
            "challenges": [
                {"type": "http-01", "uri": format!("{}/chal/0", server.uri()), "token": "TOK"}
            ]
        });
        let final_body = serde_json::json!({
            "status": final_status,
            "identifier": {"type": "dns", "value": "www.example.com"},
        });

        Mock::given(method("POST"))
            .and(path("/acme/new-authz"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("location", format!("{}/authz/abc", server.uri()).as_str())
                    .insert_header("replay-nonce", "nonce-1")
                    .set_body_json(&pending_body),
            )
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/authz/abc"))
            .respond_with(AuthzProgression {
                polls: Arc::new(AtomicUsize::new(0)),
                pending_body,
                final_body,
            })
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

    #[test]
    fn test_parse_duration_setting() {
        assert_eq!(
            parse_duration_setting("2s", "poll_interval").unwrap(),
            Duration::from_secs(2)
        );
        assert!(parse_duration_setting("soon", "poll_interval").is_err());
    }

    #[tokio::test]
    async fn test_authorize_domain_end_to_end() {
        let server = MockServer::start().await;
        let store_root = tempdir().unwrap();
        mount_scenario(&server, "valid").await;

        let settings = test_settings(&server, store_root.path());
        let authz = authorize_domain(&settings, "www.example.com").await.unwrap();

        assert_eq!(authz.state, AuthzState::Valid);
        assert_eq!(authz.dir.as_deref(), Some("www.example.com"));

        let requests = server.received_requests().await.unwrap();
        assert!(
            requests
                .iter()
                .any(|req| req.method.as_str() == "POST" && req.url.path() == "/chal/0")
        );
    }

    #[tokio::test]
    async fn test_authorize_domain_fails_on_invalid() {
        let server = MockServer::start().await;
        let store_root = tempdir().unwrap();
        mount_scenario(&server, "invalid").await;

        let settings = test_settings(&server, store_root.path());
        let err = authorize_domain(&settings, "www.example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }
}
