use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use reelchat_core::{telemetry, ApiClient, ChatBackend, ClientSettings, ErrorKind};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Reelchat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe a running backend: health, auth status and the token endpoint.
    Smoke {
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke { base_url } => smoke_test(base_url),
    }
}

fn smoke_test(base_url: Option<String>) -> Result<()> {
    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    if let Some(raw) = base_url {
        settings.base_url = raw.parse()?;
    }
    let runtime = Runtime::new()?;
    let api = ApiClient::new(settings.base_url.clone())?;

    runtime.block_on(async {
        if !api.check_health().await {
            bail!("{} is not healthy", settings.base_url);
        }
        let authenticated = api.check_auth().await;
        // Anonymous clients must be turned away by the token endpoint.
        match api.fetch_tokens().await {
            Err(err) if err.kind() == ErrorKind::Unauthorized && !authenticated => {}
            Ok(_) if authenticated => {}
            Ok(_) => bail!("token endpoint answered an anonymous client"),
            Err(err) => bail!("token endpoint failed: {err}"),
        }
        info!(
            "base_url" = %settings.base_url,
            authenticated,
            "smoke test passed"
        );
        Ok(())
    })
}
