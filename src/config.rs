use std::path::PathBuf;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: String,
    pub store_dir: PathBuf,
    pub account_key: Option<PathBuf>,
    pub acme: AcmeSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcmeSettings {
    pub version: u32,
    pub challenges: Vec<String>,
    pub poll_attempts: u64,
    pub poll_interval: String,
}

const DEFAULT_SERVER: &str = "https://localhost:9000/acme/directory";
const DEFAULT_STORE_DIR: &str = "store";
const DEFAULT_VERSION: u64 = 1;
const DEFAULT_CHALLENGES: [&str; 2] = ["http-01", "tls-alpn-01"];
const DEFAULT_POLL_ATTEMPTS: u64 = 15;
const DEFAULT_POLL_INTERVAL: &str = "2s";

impl Settings {
    /// Creates a new `Settings` instance.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        // 1. Set Defaults
        s = s
            .set_default("server", DEFAULT_SERVER)?
            .set_default("store_dir", DEFAULT_STORE_DIR)?
            .set_default("acme.version", DEFAULT_VERSION)?
            .set_default("acme.challenges", DEFAULT_CHALLENGES.to_vec())?
            .set_default("acme.poll_attempts", DEFAULT_POLL_ATTEMPTS)?
            .set_default("acme.poll_interval", DEFAULT_POLL_INTERVAL)?;

        // 2. Merge File (optional)
        let path = config_path.unwrap_or_else(|| PathBuf::from("certproof.toml"));
        s = s.add_source(File::from(path).required(false));

        // 3. Environment Variables, e.g. CERTPROOF_SERVER
        s = s.add_source(Environment::with_prefix("CERTPROOF").separator("_"));

        // 4. Build
        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &crate::Args) {
        if let Some(ca_url) = &args.ca_url {
            ca_url.clone_into(&mut self.server);
        }
        if let Some(store_dir) = &args.store_dir {
            store_dir.clone_into(&mut self.store_dir);
        }
        if let Some(account_key) = &args.account_key {
            self.account_key = Some(account_key.clone());
        }
        if !args.challenges.is_empty() {
            args.challenges.clone_into(&mut self.acme.challenges);
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        if self.acme.version != 1 && self.acme.version != 2 {
            anyhow::bail!("acme.version must be 1 or 2");
        }
        if self.acme.challenges.is_empty() {
            anyhow::bail!("acme.challenges must not be empty");
        }
        if self.acme.poll_attempts == 0 {
            anyhow::bail!("acme.poll_attempts must be greater than 0");
        }
        humantime::parse_duration(&self.acme.poll_interval)
            .map_err(|e| anyhow::anyhow!("acme.poll_interval is invalid: {e}"))?;
        Ok(())
    }
}
