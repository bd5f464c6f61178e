//! Fitted preprocessing stages, replayed in fixed order:
//! variance filter -> standardization -> feature selection.
//!
//! Nothing here is re-fitted at inference time.

use crate::error::ClassifyError;

/// Boolean column mask fitted during training
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMask {
    support: Vec<bool>,
    kept: usize,
}

impl ColumnMask {
    pub fn new(support: Vec<bool>) -> Self {
        let kept = support.iter().filter(|s| **s).count();
        Self { support, kept }
    }

    /// Width of the input this mask applies to
    pub fn input_width(&self) -> usize {
        self.support.len()
    }

    /// Number of surviving columns
    pub fn output_width(&self) -> usize {
        self.kept
    }

    /// Indices of surviving columns
    pub fn kept_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.support
            .iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| i)
    }

    pub fn apply(&self, x: &[f64]) -> Result<Vec<f64>, ClassifyError> {
        if x.len() != self.support.len() {
            return Err(ClassifyError::ClassificationFailed(format!(
                "column mask expects {} values, got {}",
                self.support.len(),
                x.len()
            )));
        }
        Ok(x.iter()
            .zip(&self.support)
            .filter(|(_, keep)| **keep)
            .map(|(v, _)| *v)
            .collect())
    }
}

/// Per-column `(x - mean) / scale`; a zero scale divides by 1
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, String> {
        if mean.len() != scale.len() {
            return Err(format!(
                "scaler mean has {} columns but scale has {}",
                mean.len(),
                scale.len()
            ));
        }
        if mean.iter().chain(&scale).any(|v| !v.is_finite()) {
            return Err("scaler parameters must be finite".to_string());
        }
        let scale = scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();
        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn apply(&self, x: &[f64]) -> Result<Vec<f64>, ClassifyError> {
        if x.len() != self.mean.len() {
            return Err(ClassifyError::ClassificationFailed(format!(
                "scaler expects {} values, got {}",
                self.mean.len(),
                x.len()
            )));
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}

/// The three fitted stages in application order
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingPipeline {
    variance: ColumnMask,
    scaler: StandardScaler,
    selector: ColumnMask,
}

impl PreprocessingPipeline {
    /// Assemble the pipeline, cross-checking stage widths
    pub fn new(
        variance: ColumnMask,
        scaler: StandardScaler,
        selector: ColumnMask,
    ) -> Result<Self, String> {
        if variance.output_width() != scaler.width() {
            return Err(format!(
                "variance filter keeps {} columns but scaler expects {}",
                variance.output_width(),
                scaler.width()
            ));
        }
        if scaler.width() != selector.input_width() {
            return Err(format!(
                "scaler emits {} columns but selector mask covers {}",
                scaler.width(),
                selector.input_width()
            ));
        }
        Ok(Self {
            variance,
            scaler,
            selector,
        })
    }

    pub fn input_width(&self) -> usize {
        self.variance.input_width()
    }

    pub fn output_width(&self) -> usize {
        self.selector.output_width()
    }

    pub fn transform(&self, raw: &[f64]) -> Result<Vec<f64>, ClassifyError> {
        let filtered = self.variance.apply(raw)?;
        let scaled = self.scaler.apply(&filtered)?;
        self.selector.apply(&scaled)
    }
}
