//! HTTP server for sonard

use crate::routes;
use anyhow::Result;
use axum::Router;
use sonar_common::ErrorBuffer;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted report body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub buffer: ErrorBuffer,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(buffer: ErrorBuffer) -> Self {
        Self {
            buffer,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::error_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves
pub async fn run<S>(listener: TcpListener, state: AppState, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::new(state));
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
