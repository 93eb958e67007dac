//! Vigil CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil::auth::{hash_password, ClaimsInput, CredentialStore, TokenService};
use vigil::channels::ChannelRegistry;
use vigil::server::{Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            secret,
            credentials,
            write_timeout_secs,
        } => serve(bind, secret, credentials, write_timeout_secs).await,
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password)?);
            Ok(())
        }
        Commands::IssueToken {
            secret,
            sub,
            username,
            role,
        } => {
            let token = TokenService::new(secret.into_bytes())
                .issue(&ClaimsInput::new(sub, username, role))
                .context("Failed to issue token")?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(
    bind: String,
    secret: String,
    credentials_path: PathBuf,
    write_timeout_secs: u64,
) -> Result<()> {
    let bind_addr = bind.parse().context("Invalid bind address")?;

    let credentials = CredentialStore::load(&credentials_path)
        .with_context(|| format!("Failed to load credentials: {}", credentials_path.display()))?;

    let config = GatewayConfig::new(bind_addr, secret.into_bytes())
        .write_timeout(Duration::from_secs(write_timeout_secs));
    config.validate()?;

    let gateway = Gateway::new(config, credentials, ChannelRegistry::standard());

    info!("Starting Vigil gateway...");
    gateway.run_until(shutdown_signal()).await?;

    info!("Vigil gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
