// crates/server/src/main.rs
//! bulkpull server binary.
//!
//! Loads configuration, opens the job store, re-enqueues jobs left unfinished
//! by the previous run, then serves the API until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use bulkpull_core::{AppConfig, ProviderRegistry};
use bulkpull_db::Database;
use bulkpull_observability::{init_tracing, TracingConfig};
use bulkpull_server::{create_app, init_metrics, AppState};

const CONFIG_ENV: &str = "BULKPULL_CONFIG";

#[derive(Debug, Parser)]
#[command(name = "bulkpull-server", version, about = "Background bulk retrieval service")]
struct Args {
    /// TOML config file (falls back to $BULKPULL_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding config and environment.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, overriding config and environment.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_tracing(&TracingConfig::from_env(
        "warn,bulkpull_server=info",
        "bulkpull-server",
    ))?;

    let config_path = args
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let mut config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = args.db {
        config.server.db_path = Some(db);
    }

    init_metrics();

    let db = Database::open(config.server.db_path.as_deref()).await?;
    let registry = ProviderRegistry::from_sources(&config.sources)
        .context("building upstream providers")?;
    if registry.names().is_empty() {
        tracing::warn!("no upstream sources configured; estimate and start will reject every request");
    }
    let state = AppState::new(db, Arc::new(registry), &config);

    let resumed = state.runner.recover().await?;
    if resumed > 0 {
        tracing::info!(jobs = resumed, "resumed unfinished jobs");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "bulkpull server listening");

    let app = create_app(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.runner.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
