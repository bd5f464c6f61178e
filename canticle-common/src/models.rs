//! Wire models shared between the classifier service and its clients
//!
//! Request bodies accept the field names of earlier deployments as aliases
//! (`audio_data`, `song_id`, `songs`).

use serde::{Deserialize, Serialize};

/// Label emitted for failed classifications
pub const UNKNOWN_LABEL: &str = "unknown";

/// Default id for requests that do not carry one
pub const DEFAULT_SONG_ID: &str = "unknown";

fn default_sample_rate() -> u32 {
    crate::config::CANONICAL_SAMPLE_RATE
}

fn default_song_id() -> String {
    DEFAULT_SONG_ID.to_string()
}

/// Single-signal classification request (POST /classify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    /// Mono samples
    #[serde(alias = "audio_data")]
    pub signal: Vec<f32>,

    /// Native sample rate of `signal`
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(alias = "song_id", default = "default_song_id")]
    pub id: String,
}

/// Pre-extracted feature classification request (POST /classify_features)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureClassifyRequest {
    /// Raw feature values in the model's schema order
    pub features: Vec<f64>,

    #[serde(alias = "id", default = "default_song_id")]
    pub song_id: String,
}

/// Batch classification request (POST /batch_classify)
///
/// Entries stay untyped so one malformed entry fails alone instead of
/// rejecting the whole request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(alias = "songs")]
    pub items: Vec<serde_json::Value>,
}

/// Class probabilities for the two labels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub christian: f64,
    pub secular: f64,
}

impl Probabilities {
    /// Uninformative distribution reported by failed results
    pub const NEUTRAL: Probabilities = Probabilities {
        christian: 0.5,
        secular: 0.5,
    };

    pub fn max(&self) -> f64 {
        self.christian.max(self.secular)
    }
}

/// Outcome of classifying one signal
///
/// Failed results always carry `prediction = "unknown"`, `confidence = 0.0`
/// and [`Probabilities::NEUTRAL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub song_id: String,
    pub prediction: String,
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn succeeded(
        song_id: impl Into<String>,
        prediction: impl Into<String>,
        probabilities: Probabilities,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            prediction: prediction.into(),
            confidence: probabilities.max(),
            probabilities,
            success: true,
            error: None,
        }
    }

    /// Fallback result for an item that could not be classified
    pub fn failed(song_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            song_id: song_id.into(),
            prediction: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            probabilities: Probabilities::NEUTRAL,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Batch tallies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Per-item results plus summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<ClassificationResult>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub fn from_results(results: Vec<ClassificationResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        };
        Self { results, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_is_neutral() {
        let result = ClassificationResult::failed("song_3", "EMPTY_SIGNAL: signal is empty");
        assert_eq!(result.prediction, "unknown");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.probabilities, Probabilities::NEUTRAL);
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_success_confidence_is_max_probability() {
        let probs = Probabilities {
            christian: 0.27,
            secular: 0.73,
        };
        let result = ClassificationResult::succeeded("a", "Secular", probs);
        assert_eq!(result.confidence, 0.73);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_classify_request_aliases_and_defaults() {
        let req: ClassifyRequest =
            serde_json::from_str(r#"{"audio_data": [0.0, 0.5], "song_id": "hymn"}"#).unwrap();
        assert_eq!(req.signal, vec![0.0, 0.5]);
        assert_eq!(req.sample_rate, 22050);
        assert_eq!(req.id, "hymn");

        let req: ClassifyRequest = serde_json::from_str(r#"{"signal": [1.0]}"#).unwrap();
        assert_eq!(req.id, "unknown");
    }

    #[test]
    fn test_batch_request_accepts_songs_key() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"songs": [{"signal": [0.1]}, 42]}"#).unwrap();
        assert_eq!(req.items.len(), 2);
    }

    #[test]
    fn test_batch_summary_counts() {
        let batch = BatchResult::from_results(vec![
            ClassificationResult::succeeded("a", "Christian", Probabilities::NEUTRAL),
            ClassificationResult::failed("b", "boom"),
            ClassificationResult::failed("c", "boom"),
        ]);
        assert_eq!(
            batch.summary,
            BatchSummary {
                total: 3,
                successful: 1,
                failed: 2
            }
        );
    }

    #[test]
    fn test_error_field_omitted_on_success() {
        let result = ClassificationResult::succeeded("a", "Christian", Probabilities::NEUTRAL);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["probabilities"]["christian"], 0.5);
    }
}
