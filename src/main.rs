//! Gatekeeper: request admission and threat mitigation.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      GATEKEEPER                       │
//!                 │                                                       │
//!   Client ──────▶│  http server ──▶ admission ──▶ handlers               │
//!                 │                    │              │                   │
//!                 │                    ▼              ▼                   │
//!                 │             ┌────────────────────────────────┐        │
//!                 │             │         SecurityLayer          │        │
//!                 │             │ rate_limit  threat  csrf       │        │
//!                 │             │ admin_session  reputation      │        │
//!                 │             └──────────────▲─────────────────┘        │
//!                 │                            │                          │
//!                 │                         sweeper                       │
//!                 │                                                       │
//!                 │  config · observability · lifecycle                   │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use gatekeeper::config::load_config;
use gatekeeper::http::HttpServer;
use gatekeeper::lifecycle::{wait_for_signal, Shutdown};
use gatekeeper::observability::{logging, metrics};
use gatekeeper::security::SecurityLayer;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about = "Request admission and threat mitigation")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // logging is not up yet
            eprintln!("gatekeeper: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("gatekeeper v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        route_classes = config.admission.classes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: gatekeeper::GatekeeperConfig) -> Result<(), std::io::Error> {
    let layer = Arc::new(SecurityLayer::new(&config));
    let shutdown = Shutdown::new();

    let sweeper = layer.sweeper().spawn(shutdown.subscribe());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, layer);
    let mut serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let joined = tokio::select! {
        joined = &mut serving => joined,
        _ = wait_for_signal() => {
            shutdown.trigger();
            serving.await
        }
    };
    // the server may have stopped on its own
    shutdown.trigger();

    let result = match joined {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    };
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }
    result
}
