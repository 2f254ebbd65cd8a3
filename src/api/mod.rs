//! HTTP surface
//!
//! - `POST /heal` runs one healing invocation and returns its report
//! - `GET /history` lists recent reports, newest first
//! - `GET /health` liveness and in-flight count

pub mod routes;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::HealError;
use crate::heal::Orchestrator;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/heal", post(routes::heal))
        .route("/history", get(routes::history))
        .route("/health", get(routes::health))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Error body for requests that never produced a report
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for HealError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "API error");
        } else {
            tracing::warn!(error = %self, "API error");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// HTTP status for an error kind carried in a report
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "remediation_rejected" | "oracle_refused" | "malformed_response" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
