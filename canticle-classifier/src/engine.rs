//! Per-item classification pipeline
//!
//! signal -> conditioner -> extractor -> bundle columns -> preprocessing -> forest
//!
//! [`ClassificationEngine::classify`] never fails: every per-item error turns
//! into a neutral fallback result carrying the error code.

use crate::error::ClassifyError;
use crate::features::{build_extractor, check_cancelled, FeatureExtractor, FeatureVector};
use crate::model::{ModelBundle, Prediction};
use crate::signal::{AudioSignal, SignalConditioner};
use canticle_common::config::ExtractionConfig;
use canticle_common::ClassificationResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ClassificationEngine {
    bundle: Option<Arc<ModelBundle>>,
    conditioner: SignalConditioner,
    extractor: Arc<dyn FeatureExtractor>,
}

impl ClassificationEngine {
    pub fn new(
        bundle: Option<Arc<ModelBundle>>,
        conditioner: SignalConditioner,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Self {
        Self {
            bundle,
            conditioner,
            extractor,
        }
    }

    /// Engine with the conditioner and extractor selected by `config`
    pub fn from_config(bundle: Option<Arc<ModelBundle>>, config: &ExtractionConfig) -> Self {
        Self::new(
            bundle,
            SignalConditioner::from_config(config),
            build_extractor(config.strategy, config.sample_rate),
        )
    }

    /// True when a model bundle is loaded
    pub fn is_ready(&self) -> bool {
        self.bundle.is_some()
    }

    pub fn bundle(&self) -> Option<&Arc<ModelBundle>> {
        self.bundle.as_ref()
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    fn require_bundle(&self) -> Result<&Arc<ModelBundle>, ClassifyError> {
        self.bundle.as_ref().ok_or(ClassifyError::ModelNotLoaded)
    }

    /// Condition and extract without classifying
    pub fn extract(
        &self,
        signal: &AudioSignal,
        cancel: &CancellationToken,
    ) -> Result<FeatureVector, ClassifyError> {
        let conditioned = self.conditioner.condition(signal)?;
        check_cancelled(cancel)
            .and_then(|()| self.extractor.extract(&conditioned, cancel))
            .map_err(|e| ClassifyError::FeatureExtractionFailed(e.to_string()))
    }

    /// Full pipeline, surfacing the error instead of a fallback
    pub fn try_classify(
        &self,
        signal: &AudioSignal,
        cancel: &CancellationToken,
    ) -> Result<Prediction, ClassifyError> {
        let bundle = self.require_bundle()?;
        let features = self.extract(signal, cancel)?;
        bundle.predict(&bundle.raw_columns(&features))
    }

    pub fn classify(&self, signal: &AudioSignal, cancel: &CancellationToken) -> ClassificationResult {
        let outcome = self.try_classify(signal, cancel);
        Self::into_result(signal.id(), outcome)
    }

    /// Validate caller samples, then classify; invalid input yields a failed result
    pub fn classify_samples(
        &self,
        id: &str,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> ClassificationResult {
        match AudioSignal::new(id, samples, sample_rate) {
            Ok(signal) => self.classify(&signal, cancel),
            Err(e) => Self::into_result(id, Err(e)),
        }
    }

    /// Classify a pre-extracted raw vector given in bundle column order
    ///
    /// The vector is zero-padded or truncated to the schema width.
    pub fn classify_columns(&self, id: &str, values: Vec<f64>) -> ClassificationResult {
        let outcome = self
            .require_bundle()
            .and_then(|bundle| bundle.predict(&bundle.fit_columns(values)));
        Self::into_result(id, outcome)
    }

    fn into_result(id: &str, outcome: Result<Prediction, ClassifyError>) -> ClassificationResult {
        match outcome {
            Ok(prediction) => {
                debug!(
                    song_id = id,
                    prediction = %prediction.label,
                    christian = prediction.probabilities.christian,
                    secular = prediction.probabilities.secular,
                    "Classified"
                );
                ClassificationResult::succeeded(id, prediction.label, prediction.probabilities)
            }
            Err(e) => {
                warn!(song_id = id, code = e.code(), error = %e, "Classification failed");
                ClassificationResult::failed(id, e.to_result_message())
            }
        }
    }
}
