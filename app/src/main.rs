use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use reelchat::Shell;
use reelchat_core::telemetry;
use reelchat_core::{ApiClient, AppState, ClientSettings};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PASSWORD_ENV: &str = "REELCHAT_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "reelchat", version, about = "Terminal client for Reelchat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Service root, overriding reelchat.yaml and REELCHAT_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether the service is healthy.
    Health,
    /// Report whether the stored session is still logged in.
    Status,
    /// Log in and start an interactive chat session.
    Shell {
        #[arg(long)]
        email: String,
        /// Create the account before logging in.
        #[arg(long)]
        signup: bool,
    },
}

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(EnvFilter::from_default_env())?;

    let cli = Cli::parse();
    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    if let Some(raw) = &cli.base_url {
        settings.base_url = raw
            .parse()
            .with_context(|| format!("invalid --base-url `{raw}`"))?;
    }

    let runtime = Runtime::new()?;
    runtime.block_on(run(cli.command, settings))
}

async fn run(command: Command, settings: ClientSettings) -> anyhow::Result<()> {
    let api = Arc::new(ApiClient::new(settings.base_url.clone())?);
    let state = AppState::new();

    match command {
        Command::Health => {
            let healthy = state.refresh_connection(&api).await;
            println!("{}", if healthy { "healthy" } else { "unreachable" });
        }
        Command::Status => {
            let authenticated = api.check_auth().await;
            println!(
                "{}",
                if authenticated {
                    "authenticated"
                } else {
                    "not authenticated"
                }
            );
        }
        Command::Shell { email, signup } => {
            let mut stdin = BufReader::new(io::stdin());
            let password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => password,
                Err(_) => {
                    eprintln!("password:");
                    let mut line = String::new();
                    stdin.read_line(&mut line).await?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            if password.is_empty() {
                bail!("a password is required (stdin or {PASSWORD_ENV})");
            }

            if signup {
                let response = api.signup(&email, &password).await?;
                if !response.success {
                    bail!(response.message.unwrap_or_else(|| "Signup failed".to_string()));
                }
            }
            let response = api.login(&email, &password).await?;
            if !response.success {
                bail!(response.message.unwrap_or_else(|| "Login failed".to_string()));
            }
            info!(%email, "logged in");

            if !state.refresh_connection(&api).await {
                eprintln!("warning: the service does not report itself healthy");
            }
            let mut shell = Shell::new(api.clone(), &settings, state);
            shell.run(stdin).await?;
            if let Err(err) = api.logout().await {
                tracing::warn!(%err, "logout failed");
            }
        }
    }

    Ok(())
}
