//! Signal intake and conditioning
//!
//! Every signal is brought to the canonical rate and window length before
//! feature extraction. The resampled length is `floor(len * target / native)`
//! for both resampling methods, so the strategies agree on sample counts.

use crate::error::ClassifyError;
use canticle_common::config::{ExtractionConfig, ExtractorStrategy};
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Sinc kernel length used by the windowed-sinc resampler
const SINC_LEN: usize = 256;

static SINC_DELAYS: Lazy<Mutex<HashMap<(u32, u32), usize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Validated caller-supplied signal
#[derive(Debug, Clone)]
pub struct AudioSignal {
    id: String,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSignal {
    /// Build a signal, rejecting empty buffers, a zero rate and non-finite samples
    pub fn new(
        id: impl Into<String>,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<Self, ClassifyError> {
        if samples.is_empty() {
            return Err(ClassifyError::EmptySignal);
        }
        if sample_rate == 0 {
            return Err(ClassifyError::InvalidSignal(
                "sample_rate must be > 0".to_string(),
            ));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(ClassifyError::InvalidSignal(format!(
                "non-finite sample at index {}",
                pos
            )));
        }

        Ok(Self {
            id: id.into(),
            samples,
            sample_rate,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Signal at the canonical rate, exactly `target_len` samples long
#[derive(Debug, Clone)]
pub struct ConditionedSignal {
    samples: Vec<f32>,
    sample_rate: u32,
    target_len: usize,
}

impl ConditionedSignal {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Samples as f64 for numeric work
    pub fn to_f64(&self) -> Vec<f64> {
        self.samples.iter().map(|&s| s as f64).collect()
    }
}

/// How off-rate signals are brought to the canonical rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMethod {
    /// Linear interpolation over evenly spaced positions
    Linear,
    /// Windowed-sinc (rubato `SincFixedIn`)
    Sinc,
}

impl From<ExtractorStrategy> for ResampleMethod {
    fn from(strategy: ExtractorStrategy) -> Self {
        match strategy {
            ExtractorStrategy::Full => ResampleMethod::Sinc,
            ExtractorStrategy::Reduced => ResampleMethod::Linear,
        }
    }
}

/// Resamples and length-normalizes signals to the canonical window
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    sample_rate: u32,
    target_len: usize,
    method: ResampleMethod,
}

impl SignalConditioner {
    pub fn new(sample_rate: u32, target_len: usize, method: ResampleMethod) -> Self {
        Self {
            sample_rate,
            target_len,
            method,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            config.sample_rate,
            config.target_length(),
            config.strategy.into(),
        )
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    pub fn condition(&self, signal: &AudioSignal) -> Result<ConditionedSignal, ClassifyError> {
        self.condition_samples(signal.samples(), signal.sample_rate())
    }

    /// Resample to the canonical rate, then truncate or zero-pad to the target length
    pub fn condition_samples(
        &self,
        samples: &[f32],
        native_rate: u32,
    ) -> Result<ConditionedSignal, ClassifyError> {
        if samples.is_empty() {
            return Err(ClassifyError::EmptySignal);
        }
        if native_rate == 0 {
            return Err(ClassifyError::InvalidSignal(
                "sample_rate must be > 0".to_string(),
            ));
        }

        let mut conditioned = if native_rate == self.sample_rate {
            samples[..samples.len().min(self.target_len)].to_vec()
        } else {
            let new_len = resampled_len(samples.len(), native_rate, self.sample_rate);
            if new_len == 0 {
                return Err(ClassifyError::EmptySignal);
            }
            debug!(
                from = native_rate,
                to = self.sample_rate,
                input = samples.len(),
                output = new_len,
                method = ?self.method,
                "Resampling signal"
            );
            match self.method {
                ResampleMethod::Linear => resample_linear(samples, new_len),
                ResampleMethod::Sinc => resample_sinc(
                    samples,
                    native_rate,
                    self.sample_rate,
                    new_len.min(self.target_len),
                )?,
            }
        };

        if conditioned.is_empty() {
            return Err(ClassifyError::EmptySignal);
        }

        conditioned.truncate(self.target_len);
        conditioned.resize(self.target_len, 0.0);

        Ok(ConditionedSignal {
            samples: conditioned,
            sample_rate: self.sample_rate,
            target_len: self.target_len,
        })
    }
}

/// Output length of a rate conversion: `floor(len * to / from)`
pub fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    ((len as u128 * to as u128) / from as u128) as usize
}

/// Linear interpolation at `new_len` evenly spaced positions over `[0, len - 1]`
fn resample_linear(samples: &[f32], new_len: usize) -> Vec<f32> {
    let last = (samples.len() - 1) as f64;
    let step = if new_len > 1 {
        last / (new_len - 1) as f64
    } else {
        0.0
    };

    (0..new_len)
        .map(|i| {
            let pos = i as f64 * step;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(samples.len() - 1);
            let frac = pos - lo as f64;
            let a = samples[lo] as f64;
            let b = samples[hi] as f64;
            (a + (b - a) * frac) as f32
        })
        .collect()
}

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn sinc_resampler(ratio: f64, chunk_size: usize) -> Result<SincFixedIn<f32>, ClassifyError> {
    SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), chunk_size, 1).map_err(|e| {
        ClassifyError::FeatureExtractionFailed(format!("Failed to create resampler: {}", e))
    })
}

fn run_sinc(resampler: &mut SincFixedIn<f32>, input: Vec<f32>) -> Result<Vec<f32>, ClassifyError> {
    let planar = resampler
        .process(&[input], None)
        .map_err(|e| ClassifyError::FeatureExtractionFailed(format!("Resampling failed: {}", e)))?;
    Ok(planar.into_iter().next().unwrap_or_default())
}

/// Measured output lag of the sinc resampler, cached per rate pair
///
/// rubato already compensates part of its kernel latency on the first
/// `process` call, so `output_delay()` overstates the shift. An impulse
/// placed mid-chunk shows where the first-call output actually lands.
fn sinc_delay(from: u32, to: u32) -> Result<usize, ClassifyError> {
    if let Some(delay) = SINC_DELAYS
        .lock()
        .ok()
        .and_then(|cache| cache.get(&(from, to)).copied())
    {
        return Ok(delay);
    }

    let ratio = to as f64 / from as f64;
    let len = 4 * SINC_LEN;
    let at = 2 * SINC_LEN;
    let mut impulse = vec![0.0f32; len];
    impulse[at] = 1.0;

    let output = run_sinc(&mut sinc_resampler(ratio, len)?, impulse)?;
    let peak = output
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| i as i64)
        .unwrap_or(0);
    let expected = (at as f64 * ratio).round() as i64;
    let delay = (peak - expected).max(0) as usize;

    debug!(from, to, delay, "Measured sinc resampler delay");
    if let Ok(mut cache) = SINC_DELAYS.lock() {
        cache.insert((from, to), delay);
    }
    Ok(delay)
}

/// Windowed-sinc conversion producing exactly `out_len` samples
///
/// Only the input needed for `out_len` outputs (plus kernel lookahead) is
/// processed. Output is aligned so input index `i` lands at `i * to / from`.
fn resample_sinc(
    samples: &[f32],
    from: u32,
    to: u32,
    out_len: usize,
) -> Result<Vec<f32>, ClassifyError> {
    let ratio = to as f64 / from as f64;
    let delay = sinc_delay(from, to)?;
    let lookahead = SINC_LEN + (delay as f64 / ratio).ceil() as usize;
    let needed = ((out_len as f64 / ratio).ceil() as usize + lookahead).min(samples.len());

    let mut input = Vec::with_capacity(needed + lookahead);
    input.extend_from_slice(&samples[..needed]);
    input.resize(needed + lookahead, 0.0);

    let mut resampler = sinc_resampler(ratio, input.len())?;
    let mut output: Vec<f32> = run_sinc(&mut resampler, input)?
        .into_iter()
        .skip(delay)
        .take(out_len)
        .collect();
    output.resize(out_len, 0.0);

    Ok(output)
}
