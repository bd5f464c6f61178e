//! Health check endpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" when a model is loaded, "unhealthy" otherwise
    pub status: String,
    /// Module name ("canticle-classifier")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub model_loaded: bool,
    /// Active extraction strategy
    pub extractor: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
}

/// GET /health
///
/// 200 when the service can classify, 503 when no model is loaded.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let model_loaded = state.engine.is_ready();
    let (code, status) = if model_loaded {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            module: "canticle-classifier".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_loaded,
            extractor: state.engine.extractor_name().to_string(),
            uptime_seconds: state.stats.uptime_seconds(),
        }),
    )
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
