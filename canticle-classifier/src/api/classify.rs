//! Classification endpoints
//!
//! - POST /classify: one raw signal
//! - POST /classify_features: one pre-extracted raw feature vector
//! - POST /batch_classify: many signals through the worker pool
//!
//! Malformed bodies are 400. A missing model is 503 for every endpoint.
//! Per-item failures are reported inside the result, never as HTTP errors.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use canticle_common::models::{BatchRequest, ClassifyRequest, FeatureClassifyRequest};
use canticle_common::{BatchResult, ClassificationResult};
use serde::Serialize;

use crate::{
    batch::BatchItem,
    error::{ApiError, ApiResult},
    AppState,
};

/// Batch response body: `{success, results, summary}`
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    #[serde(flatten)]
    pub batch: BatchResult,
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// POST /classify
pub async fn classify(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> ApiResult<Json<ClassificationResult>> {
    state.stats.record_request();
    let request = parse_body(payload)?;

    if request.signal.is_empty() {
        return Err(ApiError::BadRequest("signal is empty".to_string()));
    }
    if request.sample_rate == 0 {
        return Err(ApiError::BadRequest("sample_rate must be > 0".to_string()));
    }

    tracing::debug!(
        song_id = %request.id,
        samples = request.signal.len(),
        sample_rate = request.sample_rate,
        "Classify request"
    );

    let result = state
        .orchestrator
        .classify_one(request.id, request.signal, request.sample_rate)
        .await?;
    Ok(Json(result))
}

/// POST /classify_features
pub async fn classify_features(
    State(state): State<AppState>,
    payload: Result<Json<FeatureClassifyRequest>, JsonRejection>,
) -> ApiResult<Json<ClassificationResult>> {
    state.stats.record_request();
    let request = parse_body(payload)?;

    if request.features.is_empty() {
        return Err(ApiError::BadRequest("features is empty".to_string()));
    }
    if !state.engine.is_ready() {
        return Err(ApiError::ModelNotLoaded);
    }

    let result = state
        .engine
        .classify_columns(&request.song_id, request.features);
    state.stats.record_item(result.success);
    Ok(Json(result))
}

/// POST /batch_classify
pub async fn batch_classify(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    state.stats.record_request();
    let request = parse_body(payload)?;

    let items: Vec<BatchItem> = request
        .items
        .into_iter()
        .enumerate()
        .map(|(index, value)| BatchItem::from_json(index, value))
        .collect();

    let batch = state.orchestrator.run(items).await?;
    Ok(Json(BatchResponse {
        success: true,
        batch,
    }))
}

/// Build classification routes
pub fn classify_routes() -> Router<AppState> {
    Router::new()
        .route("/classify", post(classify))
        .route("/classify_features", post(classify_features))
        .route("/batch_classify", post(batch_classify))
}
