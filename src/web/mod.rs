//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;
use crate::stats::StatsOptions;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub stats: StatsOptions,
}

/// JSON API server for pulsewatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        let stats = StatsOptions::from(&config);
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                stats,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/api/targets", get(handlers::handle_get_targets).post(handlers::handle_create_target))
            .route(
                "/api/targets/{id}",
                get(handlers::handle_get_target)
                    .put(handlers::handle_update_target)
                    .delete(handlers::handle_delete_target),
            )
            .route("/api/targets/{id}/stats", get(handlers::handle_target_stats))
            .route("/api/targets/{id}/history", get(handlers::handle_get_history))
            .route("/api/targets/{id}/check", post(handlers::handle_check_now))
            .route("/api/stats", get(handlers::handle_multi_stats))
            .route("/api/schedule", get(handlers::handle_schedule))
            .route("/api/overview", get(handlers::handle_overview))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("Web server stopped");
        Ok(())
    }
}
