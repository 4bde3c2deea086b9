//! Tunnelhub Server
//!
//! Run with: cargo run --bin tunnelhub -- --config ./config.toml
//!
//! # Configuration
//!
//! Settings come from a TOML file (`--config`, or the default search path)
//! with environment overrides:
//! - `TUNNELHUB_HOST`: Host to bind to (default: 0.0.0.0)
//! - `TUNNELHUB_PORT`: Port to listen on (default: 8090)
//! - `TUNNELHUB_HANDSHAKE_TIMEOUT_MS`: Approval deadline (default: 5000)
//! - `TUNNELHUB_SELECTION`: `first_match` or `round_robin`
//! - `TUNNELHUB_LOG_LEVEL` / `TUNNELHUB_LOG_FORMAT`: Logging (`RUST_LOG` wins)

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunnelhub::api::{serve, AppState};
use tunnelhub::config::{generate_default_config, Config, LoggingConfig};
use tunnelhub::routing::Router;

#[derive(Parser)]
#[command(name = "tunnelhub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Routes inbound WebSocket connections to registered event handlers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a default config file
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::PrintConfig) = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting Tunnelhub v{}", env!("CARGO_PKG_VERSION"));

    let router_config = config.router_config();
    tracing::info!(
        handshake_timeout_ms = router_config.handshake_timeout.as_millis() as u64,
        queue_capacity = router_config.backend_queue_capacity,
        selection = ?router_config.selection,
        "Routing configured"
    );

    let router = Arc::new(Router::new(router_config));
    let api_config = config.api_config();
    let state = AppState::new(router, api_config.clone());

    serve(state, &api_config).await.context("server failed")?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tunnelhub={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
