use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::acme::types::ProblemDocument;
use crate::error::{AcmeError, ErrorKind, Problem, Result, problem_kind};
use crate::jws::AccountKey;

const HEADER_REPLAY_NONCE: &str = "replay-nonce";
const CONTENT_TYPE_JOSE_JSON: &str = "application/jose+json";
const CONTENT_TYPE_PROBLEM_JSON: &str = "application/problem+json";
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
struct Directory {
    #[serde(rename = "new-authz")]
    new_authz: String,
    #[serde(rename = "new-cert")]
    new_cert: String,
    #[serde(rename = "new-reg")]
    new_reg: String,
    #[serde(rename = "revoke-cert")]
    revoke_cert: String,
}

/// Shared protocol state for one certificate authority: HTTP client,
/// lazily fetched directory, account key, and the single-slot nonce cache.
///
/// Operations take `&mut self`; callers serialize access, which is what the
/// one-shot nonce requires.
pub struct AcmeContext {
    http: Client,
    directory_url: String,
    directory: Option<Directory>,
    account_key: AccountKey,
    nonce: Option<String>,
    version: u32,
}

/// A successful (2xx) protocol response.
#[derive(Debug)]
pub struct AcmeResponse {
    status: u16,
    location: Option<String>,
    body: Vec<u8>,
}

impl AcmeResponse {
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parses the response body as JSON.
    ///
    /// # Errors
    /// Returns an `invalid`-kind error if the body does not parse.
    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
            .map_err(|err| AcmeError::invalid(format!("Response is not valid JSON: {err}")))
    }
}

impl AcmeContext {
    /// Creates a context for the authority behind `directory_url`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        directory_url: impl Into<String>,
        account_key: AccountKey,
        version: u32,
    ) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            directory_url: directory_url.into(),
            directory: None,
            account_key,
            nonce: None,
            version,
        })
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// URL of the `new-authz` endpoint, fetching the directory if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be fetched or is incomplete.
    pub async fn new_authz_endpoint(&mut self) -> Result<String> {
        self.setup().await?;
        Ok(self.directory()?.new_authz.clone())
    }

    fn directory(&self) -> Result<&Directory> {
        self.directory
            .as_ref()
            .ok_or_else(|| AcmeError::invalid("ACME directory not loaded"))
    }

    async fn setup(&mut self) -> Result<()> {
        if self.directory.is_some() {
            return Ok(());
        }

        info!("Fetching ACME directory from {}", self.directory_url);
        let url = self.directory_url.clone();
        let response = self.http.get(&url).send().await?;
        let response = self.finish(response, &url).await?;

        let directory: Directory = serde_json::from_slice(response.body()).map_err(|err| {
            AcmeError::invalid(format!("ACME directory at {url} is unusable: {err}"))
        })?;
        debug!(
            "ACME directory: new-authz={}, new-cert={}, new-reg={}, revoke-cert={}",
            directory.new_authz, directory.new_cert, directory.new_reg, directory.revoke_cert
        );
        self.directory = Some(directory);
        Ok(())
    }

    /// Takes the cached nonce or fetches a fresh one with a HEAD request
    /// against the `new-reg` endpoint.
    async fn fresh_nonce(&mut self) -> Result<String> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }

        let head_url = self.directory()?.new_reg.clone();
        debug!("Fetching fresh nonce from {head_url}");
        let response = self.http.head(&head_url).send().await?;
        self.absorb_nonce(response.headers());
        self.nonce.take().ok_or_else(|| {
            AcmeError::invalid(format!("No Replay-Nonce header in response from {head_url}"))
        })
    }

    fn absorb_nonce(&mut self, headers: &HeaderMap) {
        if let Some(nonce) = headers
            .get(HEADER_REPLAY_NONCE)
            .and_then(|value| value.to_str().ok())
        {
            self.nonce = Some(nonce.to_string());
        }
    }

    /// Sends a signed POST with the current nonce attached.
    ///
    /// # Errors
    /// Returns error on transport failure, on a non-2xx response (classified
    /// via the problem document or HTTP status), or if no nonce can be
    /// obtained.
    pub async fn post(&mut self, url: &str, payload: &serde_json::Value) -> Result<AcmeResponse> {
        self.setup().await?;
        let nonce = self.fresh_nonce().await?;
        let envelope = self.account_key.sign_envelope(url, nonce, Some(payload))?;
        debug!("POST {url}");

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_JOSE_JSON)
            .json(&envelope)
            .send()
            .await?;
        self.finish(response, url).await
    }

    /// Sends an unsigned GET.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-2xx response.
    pub async fn get(&mut self, url: &str) -> Result<AcmeResponse> {
        debug!("GET {url}");
        let response = self.http.get(url).send().await?;
        self.finish(response, url).await
    }

    /// Absorbs the replay nonce and routes the response: 2xx passes through,
    /// everything else classifies into an error.
    async fn finish(&mut self, response: reqwest::Response, url: &str) -> Result<AcmeResponse> {
        self.absorb_nonce(response.headers());

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let body = response.bytes().await?;
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(AcmeError::invalid(format!(
                "Response from {url} exceeds the {MAX_RESPONSE_BYTES}-byte cap"
            )));
        }

        if (200..300).contains(&status) {
            return Ok(AcmeResponse {
                status,
                location,
                body: body.to_vec(),
            });
        }

        Err(Self::failure(status, content_type.as_deref(), &body, url))
    }

    fn failure(status: u16, content_type: Option<&str>, body: &[u8], url: &str) -> AcmeError {
        let is_problem = content_type
            .is_some_and(|value| value.starts_with(CONTENT_TYPE_PROBLEM_JSON));

        if is_problem {
            if let Ok(doc) = serde_json::from_slice::<ProblemDocument>(body) {
                let kind = doc
                    .problem_type
                    .as_deref()
                    .map_or(ErrorKind::General, problem_kind);
                error!(
                    "ACME server problem at {url}: status={status} type={} detail={}",
                    doc.problem_type.as_deref().unwrap_or("-"),
                    doc.detail.as_deref().unwrap_or("-")
                );
                return AcmeError::Protocol(Problem {
                    kind,
                    problem_type: doc.problem_type,
                    detail: doc.detail,
                    status,
                    url: url.to_string(),
                });
            }
        }

        error!("ACME request to {url} failed with HTTP {status}");
        AcmeError::for_status(status, url)
    }
}
