//! walletd Node Binary
//!
//! Serves the wallet ledger over HTTP backed by PostgreSQL.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use walletd_ledger::{postgres::run_migrations, PgLedgerEngine};
use walletd_node::{router, AppState, LogFormat, Metrics, NodeConfig};

fn init_tracing(config: &NodeConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env().map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    init_tracing(&config);

    info!("Starting walletd");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }
    info!(config = ?config, "Configuration loaded");

    let connect_options = config
        .database
        .connect_options()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .max_lifetime(config.database.max_lifetime)
        .acquire_timeout(config.database.acquire_timeout)
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    if config.run_migrations {
        run_migrations(&pool).await.context("Failed to run migrations")?;
        info!("Database migrations applied");
    } else {
        warn!("Skipping database migrations");
    }

    let ledger = PgLedgerEngine::postgres(pool.clone(), config.engine.clone());
    let state = AppState {
        ledger: Arc::new(ledger),
        metrics: Arc::new(Metrics::new()),
    };
    let app = router(state, config.request_timeout);

    let addr = config
        .socket_addr()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(listen_addr = %addr, "walletd running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    pool.close().await;
    info!("walletd shutdown complete");
    Ok(())
}
