//! API routes for sonard

use crate::server::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sonar_common::{AddOutcome, ErrorReport, InFlightEntry};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

/// Body of a 202 from POST /errors
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_count: Option<u64>,
}

impl From<AddOutcome> for AcceptedResponse {
    fn from(outcome: AddOutcome) -> Self {
        let (status, skipped_count) = match outcome {
            AddOutcome::Queued => ("queued", None),
            AddOutcome::Flushed => ("flushed", None),
            AddOutcome::Skipped { skipped_count } => ("skipped", Some(skipped_count)),
        };
        Self {
            status: status.to_string(),
            skipped_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pending: usize,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

// ============================================================================
// Error Ingress
// ============================================================================

pub fn error_routes() -> Router<AppStateArc> {
    Router::new().route("/errors", post(receive_error))
}

async fn receive_error(
    State(state): State<AppStateArc>,
    Json(report): Json<ErrorReport>,
) -> (StatusCode, Json<AcceptedResponse>) {
    info!(
        "Received error: {} (source: {})",
        report.message,
        report.source.as_deref().unwrap_or("unknown")
    );

    let outcome = state.buffer.add(report);
    (StatusCode::ACCEPTED, Json(outcome.into()))
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(health))
        .route("/in-flight", get(in_flight))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: sonar_common::VERSION.to_string(),
        pending: state.buffer.pending_len(),
        in_flight: state.buffer.in_flight_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn in_flight(State(state): State<AppStateArc>) -> Json<Vec<InFlightEntry>> {
    Json(state.buffer.in_flight_entries())
}
