//! Model bundle fixtures
//!
//! A small but complete artifact over the full extractor schema. The forest
//! is one stump on `rms_energy_ratio`: tonal or noisy signals (ratio above
//! 0.35) land on the Christian leaf (0.9/0.1), silence lands on the Secular
//! leaf (0.2/0.8).

use canticle_classifier::features::{FEATURE_COUNT, FEATURE_NAMES};
use canticle_classifier::model::ModelBundle;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const STUMP_THRESHOLD: f64 = 0.35;

/// Artifact JSON selecting `rms_energy_ratio` and `silence_ratio`
pub fn fixture_artifact() -> Value {
    let selected = ["rms_energy_ratio", "silence_ratio"];
    let support: Vec<bool> = FEATURE_NAMES.iter().map(|n| selected.contains(n)).collect();

    json!({
        "format_version": 1,
        "model_type": "random_forest",
        "feature_names": FEATURE_NAMES.to_vec(),
        "selected_feature_names": selected,
        "label_map": {"0": "Christian", "1": "Secular"},
        "transform_chain": [
            {"type": "variance_threshold", "support": vec![true; FEATURE_COUNT]},
            {"type": "standard_scaler", "mean": vec![0.0; FEATURE_COUNT], "scale": vec![1.0; FEATURE_COUNT]},
            {"type": "select_k_best", "support": support}
        ],
        "classifier": {
            "n_classes": 2,
            "classes": [0, 1],
            "trees": [{
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [0, -2, -2],
                "threshold": [STUMP_THRESHOLD, -2.0, -2.0],
                "value": [[11.0, 9.0], [2.0, 8.0], [9.0, 1.0]]
            }]
        }
    })
}

/// Parsed fixture bundle
pub fn fixture_bundle() -> ModelBundle {
    ModelBundle::from_json_str(&fixture_artifact().to_string()).unwrap()
}

/// Write the fixture artifact into `dir`, returning its path
pub fn write_fixture_bundle(dir: &Path) -> PathBuf {
    let path = dir.join("audio_classifier_random_forest.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&fixture_artifact()).unwrap()).unwrap();
    path
}
