//! canticle-classifier library interface
//!
//! Exposes the classification pipeline and HTTP router for the binary and
//! for integration testing.

pub mod api;
pub mod batch;
pub mod engine;
pub mod error;
pub mod features;
pub mod model;
pub mod signal;
pub mod stats;

pub use crate::error::{ApiError, ApiResult, BundleError, ClassifyError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use batch::BatchOrchestrator;
use canticle_common::config::TomlConfig;
use engine::ClassificationEngine;
use model::ModelBundle;
use stats::ServiceStats;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Per-item pipeline (model bundle, conditioner, extractor)
    pub engine: Arc<ClassificationEngine>,
    /// Worker pool and batch admission
    pub orchestrator: Arc<BatchOrchestrator>,
    /// Request counters
    pub stats: Arc<ServiceStats>,
    /// Resolved bootstrap configuration
    pub config: Arc<TomlConfig>,
}

impl AppState {
    /// Wire the pipeline from configuration; `bundle` is `None` when no artifact loaded
    pub fn new(config: TomlConfig, bundle: Option<ModelBundle>) -> Self {
        let engine = Arc::new(ClassificationEngine::from_config(
            bundle.map(Arc::new),
            &config.extraction,
        ));
        Self::with_engine(config, engine)
    }

    /// Wire around a prebuilt engine
    pub fn with_engine(config: TomlConfig, engine: Arc<ClassificationEngine>) -> Self {
        let stats = Arc::new(ServiceStats::new());
        let orchestrator = Arc::new(BatchOrchestrator::new(
            engine.clone(),
            stats.clone(),
            &config.batch,
        ));
        Self {
            engine,
            orchestrator,
            stats,
            config: Arc::new(config),
        }
    }
}

/// Build application router
///
/// The body limit comes from `batch.max_request_mb`; axum's 2 MB default is
/// smaller than one canonical signal encoded as JSON.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.batch.max_request_bytes();
    Router::new()
        .merge(api::info_routes())
        .merge(api::health_routes())
        .merge(api::classify_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
