use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Domain name to authorize
    pub domain: String,

    /// Path to configuration file (default: certproof.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// ACME Directory URL
    #[arg(long)]
    pub ca_url: Option<String>,

    /// Artifact store root directory
    #[arg(long, env = "CERTPROOF_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Challenge type preference order (repeatable, most preferred first)
    #[arg(long = "challenge")]
    pub challenges: Vec<String>,

    /// Path to a PKCS#8 DER account key (generated fresh when absent)
    #[arg(long = "account-key")]
    pub account_key: Option<PathBuf>,

    /// Deactivate the authorization after it completes
    #[arg(long)]
    pub deactivate: bool,
}
