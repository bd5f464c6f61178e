//! Synthetic signal generator
//!
//! Deterministic sine, noise and silence buffers for pipeline tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Configuration for a generated signal
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub amplitude: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 10.0,
            sample_rate: 22050,
            amplitude: 0.5,
        }
    }
}

impl SignalConfig {
    pub fn len(&self) -> usize {
        (self.duration_seconds * self.sample_rate as f64) as usize
    }
}

/// Pure tone at `freq` Hz
pub fn sine(freq: f32, config: &SignalConfig) -> Vec<f32> {
    let rate = config.sample_rate as f32;
    (0..config.len())
        .map(|i| config.amplitude * (2.0 * PI * freq * i as f32 / rate).sin())
        .collect()
}

/// Uniform white noise in `[-amplitude, amplitude]` from a fixed seed
pub fn noise(seed: u64, config: &SignalConfig) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..config.len())
        .map(|_| config.amplitude * rng.gen_range(-1.0f32..=1.0))
        .collect()
}

/// All-zero buffer
pub fn silence(config: &SignalConfig) -> Vec<f32> {
    vec![0.0; config.len()]
}
