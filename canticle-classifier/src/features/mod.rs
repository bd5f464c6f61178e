//! Feature extraction
//!
//! Both extractors emit the same 65 named scalars, laid out in
//! [`FEATURE_NAMES`] order. The layout is part of the model contract:
//! renaming or reordering an entry invalidates every fitted artifact.

mod full;
mod reduced;
pub mod spectral;

pub use full::FullExtractor;
pub use reduced::ReducedExtractor;

use crate::signal::ConditionedSignal;
use canticle_common::config::ExtractorStrategy;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Feature names in exact vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // === Basic energy (0-1) ===
    "signal_length_ratio",
    "rms_energy_ratio",
    // === Spectral shape (2-8) ===
    "spectral_centroid_mean",
    "spectral_centroid_std",
    "spectral_centroid_skew",
    "spectral_rolloff_mean",
    "spectral_rolloff_std",
    "spectral_bandwidth_mean",
    "spectral_bandwidth_std",
    // === Zero crossings (9-10) ===
    "zcr_mean",
    "zcr_std",
    // === Cepstral (11-36) ===
    "mfcc_1_mean",
    "mfcc_1_std",
    "mfcc_2_mean",
    "mfcc_2_std",
    "mfcc_3_mean",
    "mfcc_3_std",
    "mfcc_4_mean",
    "mfcc_4_std",
    "mfcc_5_mean",
    "mfcc_5_std",
    "mfcc_6_mean",
    "mfcc_6_std",
    "mfcc_7_mean",
    "mfcc_7_std",
    "mfcc_8_mean",
    "mfcc_8_std",
    "mfcc_9_mean",
    "mfcc_9_std",
    "mfcc_10_mean",
    "mfcc_10_std",
    "mfcc_11_mean",
    "mfcc_11_std",
    "mfcc_12_mean",
    "mfcc_12_std",
    "mfcc_13_mean",
    "mfcc_13_std",
    // === Chroma (37-50) ===
    "chroma_mean",
    "chroma_std",
    "chroma_bin_0",
    "chroma_bin_1",
    "chroma_bin_2",
    "chroma_bin_3",
    "chroma_bin_4",
    "chroma_bin_5",
    "chroma_bin_6",
    "chroma_bin_7",
    "chroma_bin_8",
    "chroma_bin_9",
    "chroma_bin_10",
    "chroma_bin_11",
    // === Tonnetz (51-52) ===
    "tonnetz_mean",
    "tonnetz_std",
    // === Rhythm (53-54) ===
    "tempo",
    "beat_strength",
    // === Contrast / flatness (55-58) ===
    "spectral_contrast_mean",
    "spectral_contrast_std",
    "spectral_flatness_mean",
    "spectral_flatness_std",
    // === Dynamics (59-60) ===
    "dynamic_range",
    "peak_to_rms_ratio",
    // === Harmonic / percussive (61-62) ===
    "harmonic_ratio",
    "percussive_ratio",
    // === Normalization / silence (63-64) ===
    "spectral_centroid_normalized",
    "silence_ratio",
];

pub const FEATURE_COUNT: usize = 65;

pub const N_MFCC: usize = 13;

static FEATURE_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect()
});

/// Position of `name` in the layout
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_INDEX.get(name).copied()
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("extraction cancelled")]
    Cancelled,

    #[error("feature '{0}' is not finite")]
    NonFinite(&'static str),

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error("conditioned signal is empty")]
    Empty,
}

/// Extracted features in layout order; every value is finite
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Wrap values already in layout order
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Result<Self, ExtractionError> {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(ExtractionError::NonFinite(FEATURE_NAMES[i]));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.0[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

/// Feature groups as computed, before layout
///
/// Extractors fill this progressively; [`RawFeatures::into_vector`] places
/// each value at its layout position and rejects non-finite output.
#[derive(Debug, Clone, Default)]
pub struct RawFeatures {
    pub signal_length_ratio: f64,
    pub rms_energy_ratio: f64,
    pub centroid_mean: f64,
    pub centroid_std: f64,
    pub centroid_skew: f64,
    pub rolloff_mean: f64,
    pub rolloff_std: f64,
    pub bandwidth_mean: f64,
    pub bandwidth_std: f64,
    pub zcr_mean: f64,
    pub zcr_std: f64,
    pub mfcc_mean: [f64; N_MFCC],
    pub mfcc_std: [f64; N_MFCC],
    pub chroma_mean: f64,
    pub chroma_std: f64,
    pub chroma_bins: [f64; 12],
    pub tonnetz_mean: f64,
    pub tonnetz_std: f64,
    pub tempo: f64,
    pub beat_strength: f64,
    pub contrast_mean: f64,
    pub contrast_std: f64,
    pub flatness_mean: f64,
    pub flatness_std: f64,
    pub dynamic_range: f64,
    pub peak_to_rms_ratio: f64,
    pub harmonic_ratio: f64,
    pub percussive_ratio: f64,
    pub centroid_normalized: f64,
    pub silence_ratio: f64,
}

impl RawFeatures {
    pub fn into_vector(self) -> Result<FeatureVector, ExtractionError> {
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        values.extend_from_slice(&[
            self.signal_length_ratio,
            self.rms_energy_ratio,
            self.centroid_mean,
            self.centroid_std,
            self.centroid_skew,
            self.rolloff_mean,
            self.rolloff_std,
            self.bandwidth_mean,
            self.bandwidth_std,
            self.zcr_mean,
            self.zcr_std,
        ]);
        for i in 0..N_MFCC {
            values.push(self.mfcc_mean[i]);
            values.push(self.mfcc_std[i]);
        }
        values.push(self.chroma_mean);
        values.push(self.chroma_std);
        values.extend_from_slice(&self.chroma_bins);
        values.extend_from_slice(&[
            self.tonnetz_mean,
            self.tonnetz_std,
            self.tempo,
            self.beat_strength,
            self.contrast_mean,
            self.contrast_std,
            self.flatness_mean,
            self.flatness_std,
            self.dynamic_range,
            self.peak_to_rms_ratio,
            self.harmonic_ratio,
            self.percussive_ratio,
            self.centroid_normalized,
            self.silence_ratio,
        ]);

        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in values.into_iter().enumerate() {
            if !value.is_finite() {
                return Err(ExtractionError::NonFinite(FEATURE_NAMES[i]));
            }
            out[i] = value;
        }
        Ok(FeatureVector(out))
    }
}

/// Features shared verbatim by both strategies (time-domain, whole signal)
pub(crate) fn fill_time_domain(y: &[f64], target_len: usize, raw: &mut RawFeatures) {
    let n = y.len() as f64;
    let rms = (y.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
    let mut abs: Vec<f64> = y.iter().map(|x| x.abs()).collect();
    let peak = abs.iter().copied().fold(0.0, f64::max);

    raw.signal_length_ratio = y.len() as f64 / target_len as f64;
    raw.rms_energy_ratio = rms / (peak + spectral::EPSILON);
    raw.peak_to_rms_ratio = peak / (rms + spectral::EPSILON);
    raw.silence_ratio =
        abs.iter().filter(|&&a| a < spectral::SILENCE_THRESHOLD).count() as f64 / n;

    abs.sort_unstable_by(f64::total_cmp);
    raw.dynamic_range =
        spectral::percentile_sorted(&abs, 95.0) - spectral::percentile_sorted(&abs, 5.0);
}

/// Energy split between a harmonic estimate and its residual, with the 0.5/0.5 fallback
pub(crate) fn energy_split(harmonic: f64, percussive: f64, eps: f64) -> (f64, f64) {
    let total = harmonic + percussive;
    if total > 0.0 && total.is_finite() {
        (harmonic / (total + eps), percussive / (total + eps))
    } else {
        (0.5, 0.5)
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), ExtractionError> {
    if cancel.is_cancelled() {
        Err(ExtractionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Maps a conditioned signal to a [`FeatureVector`]
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract all features; checks `cancel` between feature groups
    fn extract(
        &self,
        signal: &ConditionedSignal,
        cancel: &CancellationToken,
    ) -> Result<FeatureVector, ExtractionError>;
}

/// Build the extractor selected by configuration
pub fn build_extractor(strategy: ExtractorStrategy, sample_rate: u32) -> Arc<dyn FeatureExtractor> {
    match strategy {
        ExtractorStrategy::Full => Arc::new(FullExtractor::new(sample_rate)),
        ExtractorStrategy::Reduced => Arc::new(ReducedExtractor::new(sample_rate)),
    }
}

#[cfg(test)]
pub mod mock {
    //! Test extractors with controllable behavior

    use super::*;
    use std::time::Duration;

    /// Returns the same vector for every signal
    pub struct ConstantExtractor(pub [f64; FEATURE_COUNT]);

    impl FeatureExtractor for ConstantExtractor {
        fn name(&self) -> &'static str {
            "constant"
        }

        fn extract(
            &self,
            _signal: &ConditionedSignal,
            _cancel: &CancellationToken,
        ) -> Result<FeatureVector, ExtractionError> {
            Ok(FeatureVector(self.0))
        }
    }

    /// Always fails
    pub struct FailingExtractor;

    impl FeatureExtractor for FailingExtractor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract(
            &self,
            _signal: &ConditionedSignal,
            _cancel: &CancellationToken,
        ) -> Result<FeatureVector, ExtractionError> {
            Err(ExtractionError::Fft("synthetic failure".to_string()))
        }
    }

    /// Spins until cancelled or the deadline passes
    pub struct StallingExtractor(pub Duration);

    impl FeatureExtractor for StallingExtractor {
        fn name(&self) -> &'static str {
            "stalling"
        }

        fn extract(
            &self,
            _signal: &ConditionedSignal,
            cancel: &CancellationToken,
        ) -> Result<FeatureVector, ExtractionError> {
            let deadline = std::time::Instant::now() + self.0;
            while std::time::Instant::now() < deadline {
                check_cancelled(cancel)?;
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(FeatureVector([0.0; FEATURE_COUNT]))
        }
    }
}
