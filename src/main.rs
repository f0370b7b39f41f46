//! pulsewatch - uptime monitoring service
//!
//! Periodically checks HTTP targets, keeps an outcome history and serves reliability stats.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod stats;
mod web;

use config::ServerConfig;
use db::Store;
use notify::LogNotifier;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("pulsewatch=info".parse()?))
        .init();

    let cfg = ServerConfig::load();
    tracing::info!("Starting pulsewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let scheduler = Arc::new(Scheduler::new(&cfg, store.clone(), Arc::new(LogNotifier))?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    scheduler.start(&shutdown_tx);

    let server = Server::new(cfg, store, scheduler.clone());
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(());
    scheduler.shutdown().await;
    Ok(())
}
