use certproof::acme::flow;
use certproof::config::Settings;
use certproof::Args;
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut settings = Settings::new(args.config.clone())?;
    settings.merge_with_args(&args);
    settings.validate()?;

    info!("Authorizing {} against {}", args.domain, settings.server);
    let authz = match flow::authorize_domain(&settings, &args.domain).await {
        Ok(authz) => authz,
        Err(err) => {
            error!("Authorization failed: {err:?}");
            std::process::exit(1);
        }
    };

    info!("Authorization complete: {} is {}", authz.domain, authz.state);
    println!("{}", serde_json::to_string_pretty(&authz.to_json())?);

    if args.deactivate {
        flow::deactivate_authorization(&settings, &authz).await?;
        info!("Authorization for {} deactivated", authz.domain);
    }

    Ok(())
}
