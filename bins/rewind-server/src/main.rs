mod error;

use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use rewind_engine::{Engine, RewindConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "rewind-server", about = "Session telemetry capture and replay server")]
struct Cli {
    /// Path to TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long, env = "REWIND_CONFIG")]
    config: Option<String>,

    /// Override `[server] api_port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "rewind-server failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            RewindConfig::load(path)?
        }
        None => {
            tracing::info!("no configuration file given, using defaults");
            RewindConfig::default()
        }
    };
    if let Some(port) = cli.port {
        config.server.api_port = port;
    }

    let host = config.server.bind_host.clone();
    let port = config.server.api_port;
    let engine = Arc::new(Engine::bootstrap(config));
    let shutdown = CancellationToken::new();

    let mut server = tokio::spawn({
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        async move { rewind_api_server::run(&host, port, engine, shutdown).await }
    });

    tracing::info!("rewind-server started, press Ctrl+C to stop");

    tokio::select! {
        joined = &mut server => return served(joined),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            shutdown.cancel();
        }
    }

    served(server.await)
}

fn served(joined: Result<Result<(), String>, JoinError>) -> Result<(), ServerError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Serve(e)),
        Err(e) => Err(ServerError::Serve(e.to_string())),
    }
}
