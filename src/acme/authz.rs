use serde::Deserialize;
use tracing::{debug, error, info};

use crate::acme::context::AcmeContext;
use crate::acme::types::{AuthzState, Challenge, challenges_from_resource};
use crate::error::{AcmeError, Result};

/// One (domain, authorization-URL) pair tracked against the authority.
///
/// `url` is the identity of the record from creation onward. `dir` is the
/// blob-store key the prepared proof artifact lives under; it is set by the
/// challenge preparers. `resource` is the last server snapshot, kept opaque.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub domain: String,
    pub url: String,
    pub dir: Option<String>,
    pub state: AuthzState,
    pub resource: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AuthzOnDisk {
    domain: String,
    location: String,
    dir: Option<String>,
    state: u8,
}

impl Authorization {
    /// Registers a new authorization for `domain` with the authority.
    ///
    /// # Errors
    /// Returns error if the request fails, the response carries no
    /// `Location` header, or the response body is not JSON.
    pub async fn register(acme: &mut AcmeContext, domain: &str) -> Result<Self> {
        let domain = domain.to_ascii_lowercase();
        let endpoint = acme.new_authz_endpoint().await?;
        let payload = serde_json::json!({
            "resource": "new-authz",
            "identifier": {
                "type": "dns",
                "value": domain,
            }
        });

        info!("Registering authorization for {domain}");
        let response = acme.post(&endpoint, &payload).await?;

        let url = response
            .location()
            .ok_or_else(|| {
                AcmeError::invalid(format!(
                    "No Location header in new-authz response for {domain}"
                ))
            })?
            .to_string();
        let resource = response.json()?;

        info!("Authorization for {domain} registered at {url}");
        Ok(Self {
            domain,
            url,
            dir: None,
            state: AuthzState::Unknown,
            resource: Some(resource),
        })
    }

    /// Polls the authorization resource and refreshes `domain`, `resource`,
    /// and `state` from the server's answer. Terminal states are sticky.
    ///
    /// # Errors
    /// Returns error if the request fails or the server reports a status the
    /// core does not know.
    pub async fn update(&mut self, acme: &mut AcmeContext) -> Result<()> {
        let response = acme.get(&self.url).await?;
        let resource = response.json()?;

        if let Some(value) = resource
            .pointer("/identifier/value")
            .and_then(|v| v.as_str())
        {
            self.domain = value.to_ascii_lowercase();
        }

        let status = resource
            .get("status")
            .and_then(|v| v.as_str())
            .map(ToString::to_string);
        self.resource = Some(resource);

        let mapped = match status.as_deref() {
            Some("pending") => Some(AuthzState::Pending),
            Some("valid") => Some(AuthzState::Valid),
            Some("invalid") => Some(AuthzState::Invalid),
            _ => None,
        };

        let Some(next) = mapped else {
            if !self.state.is_terminal() {
                self.state = AuthzState::Unknown;
            }
            error!(
                "Authorization for {} at {} reports unusable status {:?}",
                self.domain, self.url, status
            );
            return Err(AcmeError::invalid(format!(
                "Authorization at {} has unknown status {:?}",
                self.url, status
            )));
        };

        if self.state.is_terminal() && next != self.state {
            debug!(
                "Authorization for {} already {}; ignoring server state {next}",
                self.domain, self.state
            );
        } else {
            self.state = next;
        }

        if self.state == AuthzState::Invalid {
            error!(
                "Authorization for {} at {} is invalid",
                self.domain, self.url
            );
        } else {
            info!(
                "Authorization for {} at {} is {}",
                self.domain, self.url, self.state
            );
        }
        Ok(())
    }

    /// Asks the authority to deactivate this authorization. The in-memory
    /// record is left untouched; callers drop it afterwards.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn deactivate(&self, acme: &mut AcmeContext) -> Result<()> {
        info!(
            "Deactivating authorization for {} at {}",
            self.domain, self.url
        );
        let payload = serde_json::json!({"status": "deactivated"});
        acme.post(&self.url, &payload).await?;
        Ok(())
    }

    /// Challenges offered in the current server snapshot.
    #[must_use]
    pub fn challenges(&self) -> Vec<Challenge> {
        self.resource
            .as_ref()
            .map(challenges_from_resource)
            .unwrap_or_default()
    }

    /// Stable on-disk JSON shape. The server snapshot is deliberately not
    /// persisted; [`Authorization::update`] reacquires it.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "domain": self.domain,
            "location": self.url,
            "dir": self.dir,
            "state": self.state.ordinal(),
        })
    }

    /// Restores a record from its on-disk JSON shape.
    ///
    /// # Errors
    /// Returns an `invalid`-kind error if required fields are missing or the
    /// state ordinal is out of range.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let disk: AuthzOnDisk = serde_json::from_value(value.clone())
            .map_err(|err| AcmeError::invalid(format!("Unreadable authorization record: {err}")))?;
        let state = AuthzState::from_ordinal(disk.state).ok_or_else(|| {
            AcmeError::invalid(format!(
                "Authorization record has unknown state ordinal {}",
                disk.state
            ))
        })?;

        Ok(Self {
            domain: disk.domain,
            url: disk.location,
            dir: disk.dir,
            state,
            resource: None,
        })
    }
}
