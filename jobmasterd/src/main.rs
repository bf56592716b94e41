//! Job master client-service daemon.
//!
//! Binds the secured client endpoint, serves queries against the
//! registry and posts accepted commands to the event bus. The state
//! machines consuming those events live outside this daemon; here the
//! bus is drained into the log.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::signal;
use tracing::info;

use jobmaster_common::ids::{ApplicationAttemptId, ApplicationId};
use jobmasterd::config::ClientServiceConfig;
use jobmasterd::events::EventBus;
use jobmasterd::registry::InMemoryAppContext;
use jobmasterd::secrets::{EnvSecretProvider, SecretProvider, StaticSecretProvider};
use jobmasterd::service::ClientService;

#[derive(Parser, Debug)]
#[command(name = "jobmasterd", version)]
#[command(about = "Job master client service daemon")]
struct Cli {
    /// Path to the daemon configuration (jobmasterd.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Raw signing secret override for local development (bypasses
    /// the environment-provided secret)
    #[arg(long)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!("jobmasterd version {}", env!("CARGO_PKG_VERSION"));

    let config = ClientServiceConfig::load(cli.config.as_deref())?;

    let attempt_id = ApplicationAttemptId::new(
        ApplicationId::new(Utc::now().timestamp_millis() as u64, 1),
        1,
    );
    let context = Arc::new(InMemoryAppContext::new(attempt_id));

    let secrets: Box<dyn SecretProvider> = match cli.secret {
        Some(secret) => Box::new(StaticSecretProvider(secret.into_bytes())),
        None => Box::new(EnvSecretProvider),
    };

    let (events, mut rx) = EventBus::new();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(kind = event.kind(), "accepted command event: {event:?}");
        }
    });

    let mut service =
        ClientService::start(&config, context, events, secrets.as_ref()).await?;
    info!(addr = %service.bind_address(), "jobmasterd serving");
    if let Some(port) = service.http_port() {
        info!(port, "status interface available");
    }

    signal::ctrl_c().await?;
    info!("shutdown requested");
    service.stop();
    Ok(())
}
