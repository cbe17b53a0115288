//! HTTP server for vigild

use crate::engine::Engine;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}

/// Full router with request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::alert_routes())
        .merge(routes::facility_routes())
        .merge(routes::health_routes())
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves
pub async fn run(state: AppState, listen: &str, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("[READY] Listening on http://{}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
