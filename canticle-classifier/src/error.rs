//! Error types for canticle-classifier
//!
//! Three layers:
//! - [`ClassifyError`]: per-item failures, converted into fallback results
//! - [`BundleError`]: model artifact loading and validation
//! - [`ApiError`]: request-level failures rendered as JSON error bodies

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::batch::BatchError;

/// Per-item classification failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("signal is empty")]
    EmptySignal,

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("feature extraction failed: {0}")]
    FeatureExtractionFailed(String),

    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    #[error("item exceeded time budget of {}s", .0.as_secs_f64())]
    ItemTimeout(Duration),
}

impl ClassifyError {
    /// Stable code string reported to clients
    pub fn code(&self) -> &'static str {
        match self {
            ClassifyError::ModelNotLoaded => "MODEL_NOT_LOADED",
            ClassifyError::EmptySignal => "EMPTY_SIGNAL",
            ClassifyError::InvalidSignal(_) => "INVALID_SIGNAL",
            ClassifyError::FeatureExtractionFailed(_) => "FEATURE_EXTRACTION_FAILED",
            ClassifyError::ClassificationFailed(_) => "CLASSIFICATION_FAILED",
            ClassifyError::ItemTimeout(_) => "ITEM_TIMEOUT",
        }
    }

    /// Text stored in a failed result's `error` field
    pub fn to_result_message(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

/// Model artifact loading failure
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no model artifact found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No model bundle present (503)
    #[error("Model not loaded")]
    ModelNotLoaded,

    /// Admission control rejected the request (503)
    #[error("Service busy: {0}")]
    Busy(String),
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::ModelNotLoaded => ApiError::ModelNotLoaded,
            BatchError::Busy { .. } => ApiError::Busy(err.to_string()),
            BatchError::Empty | BatchError::TooLarge { .. } => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::ModelNotLoaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MODEL_NOT_LOADED",
                "Model not loaded".to_string(),
            ),
            ApiError::Busy(msg) => (StatusCode::SERVICE_UNAVAILABLE, "BUSY", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
