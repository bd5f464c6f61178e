//! Service identity, model metadata and performance endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    model::BundleMetadata,
    stats::StatsSnapshot,
    AppState,
};

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

/// GET / response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub model_loaded: bool,
    pub endpoints: Vec<EndpointInfo>,
}

const ENDPOINTS: [(&str, &str, &str); 7] = [
    ("GET", "/", "Service identity and endpoint list"),
    ("GET", "/health", "Health check"),
    ("POST", "/classify", "Classify one raw signal"),
    ("POST", "/classify_features", "Classify a pre-extracted feature vector"),
    ("POST", "/batch_classify", "Classify many signals"),
    ("GET", "/model_info", "Model metadata"),
    ("GET", "/performance", "Worker pool and request counters"),
];

/// GET /
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "canticle-classifier".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.engine.is_ready(),
        endpoints: ENDPOINTS
            .iter()
            .map(|(method, path, description)| EndpointInfo {
                method,
                path,
                description,
            })
            .collect(),
    })
}

/// GET /model_info response
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    #[serde(flatten)]
    pub model: BundleMetadata,
    pub extractor: String,
    pub sample_rate: u32,
    pub duration_secs: u32,
    pub stats: StatsSnapshot,
}

/// GET /model_info
pub async fn model_info(State(state): State<AppState>) -> ApiResult<Json<ModelInfoResponse>> {
    let bundle = state.engine.bundle().ok_or(ApiError::ModelNotLoaded)?;
    let extraction = &state.config.extraction;

    Ok(Json(ModelInfoResponse {
        model: bundle.metadata(),
        extractor: state.engine.extractor_name().to_string(),
        sample_rate: extraction.sample_rate,
        duration_secs: extraction.duration_secs,
        stats: state.stats.snapshot(),
    }))
}

/// GET /performance response
#[derive(Debug, Serialize)]
pub struct PerformanceResponse {
    pub model_loaded: bool,
    pub extractor: String,
    pub workers: usize,
    pub busy_workers: usize,
    pub pending_batches: usize,
    pub max_pending_batches: usize,
    pub max_batch_size: usize,
    pub item_timeout_secs: f64,
    pub stats: StatsSnapshot,
}

/// GET /performance
pub async fn performance(State(state): State<AppState>) -> Json<PerformanceResponse> {
    let orch = &state.orchestrator;
    Json(PerformanceResponse {
        model_loaded: state.engine.is_ready(),
        extractor: state.engine.extractor_name().to_string(),
        workers: orch.workers(),
        busy_workers: orch.busy_workers(),
        pending_batches: orch.pending_batches(),
        max_pending_batches: orch.max_pending_batches(),
        max_batch_size: orch.max_items(),
        item_timeout_secs: orch.item_timeout().as_secs_f64(),
        stats: state.stats.snapshot(),
    })
}

/// Build identity and metadata routes
pub fn info_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/model_info", get(model_info))
        .route("/performance", get(performance))
}
