//! # Debug Routes
//!
//! Read-only endpoints under `/debug`: the active configuration version
//! with its provenance and reload time, and a liveness check for the data
//! plane itself. Nothing here mutates configuration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::server::AppState;

/// Active configuration status
#[derive(Debug, Serialize)]
pub struct ConfigStatusResponse {
    pub version: String,
    pub source: String,
    pub last_reload_at: String,
}

/// Data plane liveness
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the debug routes
pub fn debug_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/debug/config", get(config_status_handler))
        .route("/debug/health", get(health_handler))
}

/// Active snapshot version, provenance, and reload timestamp
async fn config_status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.current();
    let response = ConfigStatusResponse {
        version: snapshot.version.clone(),
        source: snapshot.source.as_str().to_string(),
        last_reload_at: snapshot.admitted_at.to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// Liveness of the data plane process
async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}
