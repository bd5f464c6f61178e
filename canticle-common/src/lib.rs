//! # Canticle Common Library
//!
//! Shared code for the Canticle classification service:
//! - Error type used by configuration loading
//! - TOML bootstrap configuration and resolution
//! - Wire models (requests, classification results, batch results)

pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
pub use models::{BatchResult, BatchSummary, ClassificationResult, Probabilities};
