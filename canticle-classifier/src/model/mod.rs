//! Model bundle: the frozen, versioned classification artifact
//!
//! The artifact is one JSON document holding the feature schema, the fitted
//! transform chain, the random forest and the label map. A bundle is
//! validated once at load and never mutated afterwards; callers share it
//! through `Arc<ModelBundle>`.

pub mod forest;
pub mod preprocess;

use crate::error::{BundleError, ClassifyError};
use crate::features::{feature_index, FeatureVector};
use canticle_common::Probabilities;
use chrono::{DateTime, Utc};
use forest::{ForestSpec, RandomForest};
use preprocess::{ColumnMask, PreprocessingPipeline, StandardScaler};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Artifact format understood by this build
pub const FORMAT_VERSION: u32 = 1;

pub const LABEL_CHRISTIAN: &str = "Christian";
pub const LABEL_SECULAR: &str = "Secular";

/// One fitted transform in the serialized chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformSpec {
    VarianceThreshold { support: Vec<bool> },
    StandardScaler { mean: Vec<f64>, scale: Vec<f64> },
    SelectKBest { support: Vec<bool> },
}

impl TransformSpec {
    fn kind(&self) -> &'static str {
        match self {
            TransformSpec::VarianceThreshold { .. } => "variance_threshold",
            TransformSpec::StandardScaler { .. } => "standard_scaler",
            TransformSpec::SelectKBest { .. } => "select_k_best",
        }
    }
}

/// On-disk artifact layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub selected_feature_names: Vec<String>,
    /// Class value (as string) to human label
    pub label_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_weights: Option<serde_json::Value>,
    pub transform_chain: Vec<TransformSpec>,
    pub classifier: ForestSpec,
}

/// Outcome of running the pipeline and forest on one raw vector
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probabilities: Probabilities,
}

/// Read-only snapshot for `/model_info`
#[derive(Debug, Clone, Serialize)]
pub struct BundleMetadata {
    pub model_type: String,
    pub format_version: u32,
    pub n_features: usize,
    pub n_selected_features: usize,
    pub n_trees: usize,
    pub feature_names: Vec<String>,
    pub selected_feature_names: Vec<String>,
    pub label_map: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_weights: Option<serde_json::Value>,
    /// Schema names the extractor does not produce (always fed as 0.0)
    pub unmapped_features: Vec<String>,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
}

/// Validated, immutable model bundle
#[derive(Debug)]
pub struct ModelBundle {
    model_type: String,
    format_version: u32,
    feature_names: Vec<String>,
    selected_feature_names: Vec<String>,
    label_map: BTreeMap<String, String>,
    class_weights: Option<serde_json::Value>,
    pipeline: PreprocessingPipeline,
    forest: RandomForest,
    /// Forest output index holding class 0 ("Christian")
    christian_index: usize,
    /// Bundle column -> extractor layout index
    column_map: Vec<Option<usize>>,
    checksum: String,
    source: Option<PathBuf>,
    loaded_at: DateTime<Utc>,
}

impl ModelBundle {
    /// Probe `candidates` in order and load the first artifact that validates
    pub fn load_first(candidates: &[PathBuf]) -> Result<Self, BundleError> {
        let mut last_error = None;
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match Self::load(path) {
                Ok(bundle) => return Ok(bundle),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unusable model artifact");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BundleError::NotFound {
            searched: candidates.to_vec(),
        }))
    }

    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let bytes = std::fs::read(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut bundle = Self::from_slice(&bytes)?;
        bundle.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            model_type = %bundle.model_type,
            features = bundle.feature_names.len(),
            selected = bundle.selected_feature_names.len(),
            trees = bundle.forest.n_trees(),
            checksum = %bundle.checksum,
            "Model bundle loaded"
        );
        Ok(bundle)
    }

    pub fn from_json_str(json: &str) -> Result<Self, BundleError> {
        Self::from_slice(json.as_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BundleError> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)?;
        let checksum = format!("{:x}", Sha256::digest(bytes));
        Self::from_artifact(artifact, checksum)
    }

    fn from_artifact(artifact: ModelArtifact, checksum: String) -> Result<Self, BundleError> {
        let invalid = BundleError::Invalid;

        if artifact.format_version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported format_version {} (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }

        let expected_labels: BTreeMap<String, String> = [
            ("0".to_string(), LABEL_CHRISTIAN.to_string()),
            ("1".to_string(), LABEL_SECULAR.to_string()),
        ]
        .into_iter()
        .collect();
        if artifact.label_map != expected_labels {
            return Err(invalid(format!(
                "label_map must be {{0: {}, 1: {}}}, got {:?}",
                LABEL_CHRISTIAN, LABEL_SECULAR, artifact.label_map
            )));
        }

        let pipeline = build_pipeline(&artifact.transform_chain).map_err(invalid)?;

        if pipeline.input_width() != artifact.feature_names.len() {
            return Err(invalid(format!(
                "feature_names has {} entries but the transform chain expects {}",
                artifact.feature_names.len(),
                pipeline.input_width()
            )));
        }
        if pipeline.output_width() != artifact.selected_feature_names.len() {
            return Err(invalid(format!(
                "selected_feature_names has {} entries but the selector keeps {}",
                artifact.selected_feature_names.len(),
                pipeline.output_width()
            )));
        }

        let forest =
            RandomForest::from_spec(&artifact.classifier, pipeline.output_width()).map_err(invalid)?;

        let class_position = |class: i64| forest.classes().iter().position(|c| *c == class);
        let (christian_index, secular_index) = match (class_position(0), class_position(1)) {
            (Some(c), Some(s)) if forest.classes().len() == 2 => (c, s),
            _ => {
                return Err(invalid(format!(
                    "classifier classes must be [0, 1], got {:?}",
                    forest.classes()
                )))
            }
        };
        debug_assert_ne!(christian_index, secular_index);

        let column_map = artifact
            .feature_names
            .iter()
            .map(|name| feature_index(name))
            .collect();

        Ok(Self {
            model_type: artifact.model_type,
            format_version: artifact.format_version,
            feature_names: artifact.feature_names,
            selected_feature_names: artifact.selected_feature_names,
            label_map: artifact.label_map,
            class_weights: artifact.class_weights,
            pipeline,
            forest,
            christian_index,
            column_map,
            checksum,
            source: None,
            loaded_at: Utc::now(),
        })
    }

    /// Raw column vector in bundle order; names the extractor lacks become 0.0
    pub fn raw_columns(&self, features: &FeatureVector) -> Vec<f64> {
        let values = features.values();
        self.column_map
            .iter()
            .map(|idx| idx.map_or(0.0, |i| values[i]))
            .collect()
    }

    /// Fit caller-supplied values to the schema width (zero-pad or truncate)
    pub fn fit_columns(&self, mut values: Vec<f64>) -> Vec<f64> {
        values.resize(self.feature_names.len(), 0.0);
        values
    }

    /// Preprocess a raw column vector and run the forest
    pub fn predict(&self, raw: &[f64]) -> Result<Prediction, ClassifyError> {
        if let Some(pos) = raw.iter().position(|v| !v.is_finite()) {
            return Err(ClassifyError::ClassificationFailed(format!(
                "raw column {} is not finite",
                pos
            )));
        }
        let transformed = self.pipeline.transform(raw)?;
        let probs = self.forest.predict_proba(&transformed)?;

        let christian = probs[self.christian_index];
        let secular = probs[1 - self.christian_index];
        let label = if RandomForest::argmax(&probs) == self.christian_index {
            LABEL_CHRISTIAN
        } else {
            LABEL_SECULAR
        };

        Ok(Prediction {
            label: label.to_string(),
            probabilities: Probabilities { christian, secular },
        })
    }

    pub fn metadata(&self) -> BundleMetadata {
        BundleMetadata {
            model_type: self.model_type.clone(),
            format_version: self.format_version,
            n_features: self.feature_names.len(),
            n_selected_features: self.selected_feature_names.len(),
            n_trees: self.forest.n_trees(),
            feature_names: self.feature_names.clone(),
            selected_feature_names: self.selected_feature_names.clone(),
            label_map: self.label_map.clone(),
            class_weights: self.class_weights.clone(),
            unmapped_features: self
                .feature_names
                .iter()
                .zip(&self.column_map)
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.clone())
                .collect(),
            checksum: self.checksum.clone(),
            source: self.source.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Build the pipeline from a chain that must read
/// `variance_threshold, standard_scaler, select_k_best`
fn build_pipeline(chain: &[TransformSpec]) -> Result<PreprocessingPipeline, String> {
    match chain {
        [TransformSpec::VarianceThreshold { support: variance }, TransformSpec::StandardScaler { mean, scale }, TransformSpec::SelectKBest { support: selected }] => {
            PreprocessingPipeline::new(
                ColumnMask::new(variance.clone()),
                StandardScaler::new(mean.clone(), scale.clone())?,
                ColumnMask::new(selected.clone()),
            )
        }
        _ => {
            let kinds: Vec<&str> = chain.iter().map(TransformSpec::kind).collect();
            Err(format!(
                "transform_chain must be [variance_threshold, standard_scaler, select_k_best], got {:?}",
                kinds
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::forest::{TreeSpec, LEAF};
    use super::*;
    use serde_json::json;

    /// Two raw columns, one known to the extractor and one not
    fn artifact() -> serde_json::Value {
        json!({
            "format_version": 1,
            "model_type": "random_forest",
            "feature_names": ["silence_ratio", "legacy_column"],
            "selected_feature_names": ["silence_ratio"],
            "label_map": {"0": "Christian", "1": "Secular"},
            "class_weights": {"0": 1.2, "1": 0.8},
            "transform_chain": [
                {"type": "variance_threshold", "support": [true, true]},
                {"type": "standard_scaler", "mean": [0.5, 0.0], "scale": [0.5, 0.0]},
                {"type": "select_k_best", "support": [true, false]}
            ],
            "classifier": {
                "n_classes": 2,
                "classes": [0, 1],
                "trees": [{
                    "children_left": [1, LEAF, LEAF],
                    "children_right": [2, LEAF, LEAF],
                    "feature": [0, -2, -2],
                    "threshold": [0.0, -2.0, -2.0],
                    "value": [[5.0, 5.0], [1.0, 4.0], [4.0, 1.0]]
                }]
            }
        })
    }

    fn load(value: serde_json::Value) -> Result<ModelBundle, BundleError> {
        ModelBundle::from_json_str(&value.to_string())
    }

    #[test]
    fn test_valid_artifact_loads() {
        let bundle = load(artifact()).unwrap();
        let meta = bundle.metadata();
        assert_eq!(meta.n_features, 2);
        assert_eq!(meta.n_selected_features, 1);
        assert_eq!(meta.n_trees, 1);
        assert_eq!(meta.unmapped_features, vec!["legacy_column".to_string()]);
        assert_eq!(meta.checksum.len(), 64);
        assert!(meta.class_weights.is_some());
    }

    #[test]
    fn test_predict_maps_labels() {
        let bundle = load(artifact()).unwrap();

        // silence 1.0 -> scaled 1.0 > 0 -> right leaf (4:1) -> Christian
        let p = bundle.predict(&[1.0, 0.0]).unwrap();
        assert_eq!(p.label, "Christian");
        assert!((p.probabilities.christian - 0.8).abs() < 1e-12);
        assert!((p.probabilities.secular - 0.2).abs() < 1e-12);

        // silence 0.0 -> scaled -1.0 -> left leaf (1:4) -> Secular
        let p = bundle.predict(&[0.0, 0.0]).unwrap();
        assert_eq!(p.label, "Secular");
    }

    #[test]
    fn test_raw_columns_default_missing_names() {
        let bundle = load(artifact()).unwrap();
        let mut values = [0.0; crate::features::FEATURE_COUNT];
        values[feature_index("silence_ratio").unwrap()] = 0.25;
        let features = FeatureVector::from_values(values).unwrap();
        assert_eq!(bundle.raw_columns(&features), vec![0.25, 0.0]);
    }

    #[test]
    fn test_fit_columns_pads_and_truncates() {
        let bundle = load(artifact()).unwrap();
        assert_eq!(bundle.fit_columns(vec![1.0]), vec![1.0, 0.0]);
        assert_eq!(bundle.fit_columns(vec![1.0, 2.0, 3.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_wrong_label_map_rejected() {
        let mut value = artifact();
        value["label_map"] = json!({"0": "Secular", "1": "Christian"});
        assert!(matches!(load(value), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn test_chain_order_enforced() {
        let mut value = artifact();
        let chain = value["transform_chain"].as_array_mut().unwrap();
        chain.swap(0, 1);
        assert!(matches!(load(value), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut value = artifact();
        value["selected_feature_names"] = json!(["silence_ratio", "legacy_column"]);
        assert!(matches!(load(value), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut value = artifact();
        value["format_version"] = json!(2);
        assert!(matches!(load(value), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            ModelBundle::from_json_str("{not json"),
            Err(BundleError::Parse(_))
        ));
    }

    #[test]
    fn test_load_first_reports_not_found() {
        let err = ModelBundle::load_first(&[PathBuf::from("/nonexistent/model.json")]).unwrap_err();
        assert!(matches!(err, BundleError::NotFound { .. }));
    }

    #[test]
    fn test_tree_spec_deserializes_from_artifact() {
        let spec: TreeSpec = serde_json::from_value(artifact()["classifier"]["trees"][0].clone()).unwrap();
        assert_eq!(spec.children_left[0], 1);
    }
}
