//! Reduced extractor: one whole-signal FFT and simplified derivations
//!
//! Cheaper than [`super::FullExtractor`] and emits the same names, but several
//! dispersion features collapse to spectrum-wide statistics or zero. Models
//! fitted on full-strategy features lose some accuracy here.

use super::spectral::{self, EPSILON, ROLLOFF_PERCENT};
use super::{
    check_cancelled, energy_split, fill_time_domain, ExtractionError, FeatureExtractor,
    FeatureVector, RawFeatures, N_MFCC,
};
use crate::signal::ConditionedSignal;
use realfft::RealFftPlanner;
use tokio_util::sync::CancellationToken;

const N_FILTERS: usize = 26;
const CONTRAST_BANDS: usize = 7;
const MEDIAN_WINDOW: usize = 31;

pub struct ReducedExtractor {
    sample_rate: u32,
}

impl ReducedExtractor {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl FeatureExtractor for ReducedExtractor {
    fn name(&self) -> &'static str {
        "reduced"
    }

    fn extract(
        &self,
        signal: &ConditionedSignal,
        cancel: &CancellationToken,
    ) -> Result<FeatureVector, ExtractionError> {
        if signal.is_empty() {
            return Err(ExtractionError::Empty);
        }
        let y = signal.to_f64();
        let n = y.len();
        let bin_hz = self.sample_rate as f64 / n as f64;
        let mut raw = RawFeatures::default();

        fill_time_domain(&y, signal.target_len(), &mut raw);
        check_cancelled(cancel)?;

        let magnitude = half_spectrum(&y)?;
        let freqs: Vec<f64> = (0..magnitude.len()).map(|k| k as f64 * bin_hz).collect();
        spectral_shape(&magnitude, &freqs, &mut raw);
        raw.centroid_normalized = raw.centroid_mean / (self.sample_rate as f64 / 2.0);
        check_cancelled(cancel)?;

        let (zcr_mean, zcr_std) = sign_changes(&y);
        raw.zcr_mean = zcr_mean;
        raw.zcr_std = zcr_std;

        raw.mfcc_mean = cepstrum(&y)?;
        raw.mfcc_std = [0.0; N_MFCC];
        check_cancelled(cancel)?;

        let chroma = spectral::fold_chroma(&magnitude, bin_hz);
        raw.chroma_bins = chroma;
        raw.chroma_mean = spectral::mean(&chroma);
        raw.chroma_std = spectral::std(&chroma);
        let tonnetz: Vec<f64> = (0..6).map(|k| chroma[k] - chroma[k + 3]).collect();
        raw.tonnetz_mean = spectral::mean(&tonnetz);
        raw.tonnetz_std = spectral::std(&tonnetz);
        check_cancelled(cancel)?;

        let autocorr = spectral::autocorrelation(&y)?;
        raw.tempo = spectral::tempo_from_autocorrelation(&autocorr, self.sample_rate as f64);
        raw.beat_strength = spectral::std(&y);
        check_cancelled(cancel)?;

        let contrast = band_contrast(&magnitude);
        raw.contrast_mean = spectral::mean(&contrast);
        raw.contrast_std = spectral::std(&contrast);
        raw.flatness_mean = flatness(&magnitude);
        raw.flatness_std = 0.0;
        check_cancelled(cancel)?;

        let (h, p) = running_median_split(&y);
        raw.harmonic_ratio = h;
        raw.percussive_ratio = p;

        raw.into_vector()
    }
}

/// |FFT| of the whole signal, first `n / 2` bins
fn half_spectrum(y: &[f64]) -> Result<Vec<f64>, ExtractionError> {
    let n = y.len();
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut input = y.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum)
        .map_err(|e| ExtractionError::Fft(e.to_string()))?;
    Ok(spectrum.iter().take(n / 2).map(|c| c.norm()).collect())
}

/// Single-spectrum centroid, rolloff and bandwidth; the `_std` slots carry std(magnitude)
fn spectral_shape(magnitude: &[f64], freqs: &[f64], raw: &mut RawFeatures) {
    let total: f64 = magnitude.iter().sum();
    let spread = spectral::std(magnitude);

    let centroid = if total > 0.0 {
        freqs.iter().zip(magnitude).map(|(f, m)| f * m).sum::<f64>() / total
    } else {
        0.0
    };
    let bandwidth = if total > 0.0 {
        (freqs
            .iter()
            .zip(magnitude)
            .map(|(f, m)| (f - centroid).powi(2) * m)
            .sum::<f64>()
            / total)
            .sqrt()
    } else {
        0.0
    };

    let threshold = ROLLOFF_PERCENT * total;
    let mut cumulative = 0.0;
    let mut rolloff = freqs.last().copied().unwrap_or(0.0);
    for (f, m) in freqs.iter().zip(magnitude) {
        cumulative += m;
        if cumulative >= threshold {
            rolloff = *f;
            break;
        }
    }

    raw.centroid_mean = centroid;
    raw.centroid_std = spread;
    raw.centroid_skew = spectral::skewness(magnitude);
    raw.rolloff_mean = rolloff;
    raw.rolloff_std = spread;
    raw.bandwidth_mean = bandwidth;
    raw.bandwidth_std = spread;
}

fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Rate of sign changes and std of the sign differences
fn sign_changes(y: &[f64]) -> (f64, f64) {
    let diffs: Vec<f64> = y
        .windows(2)
        .map(|w| signum(w[1]) - signum(w[0]))
        .collect();
    let changes = diffs.iter().filter(|d| **d != 0.0).count();
    (changes as f64 / y.len() as f64, spectral::std(&diffs))
}

/// Evenly spaced values from `start` to `end` inclusive (`count` points)
fn linspace(start: f64, end: f64, count: usize) -> impl Iterator<Item = f64> {
    let step = if count > 1 {
        (end - start) / (count - 1) as f64
    } else {
        0.0
    };
    (0..count).map(move |i| start + step * i as f64)
}

/// Whole-signal cepstrum: symmetric Hann, 26 linear triangular filters, ln, DCT-II
fn cepstrum(y: &[f64]) -> Result<[f64; N_MFCC], ExtractionError> {
    let window = spectral::hann_symmetric(y.len());
    let windowed: Vec<f64> = y.iter().zip(&window).map(|(x, w)| x * w).collect();
    let magnitude = half_spectrum(&windowed)?;
    let width = magnitude.len();

    let points: Vec<usize> = linspace(0.0, width as f64, N_FILTERS + 2)
        .map(|p| p as usize)
        .collect();

    let log_energies: Vec<f64> = (0..N_FILTERS)
        .map(|i| {
            let (left, center, right) = (points[i], points[i + 1], points[i + 2]);
            let rising = (left..center).zip(linspace(0.0, 1.0, center - left));
            let falling = (center..right).zip(linspace(1.0, 0.0, right - center));
            let energy: f64 = rising
                .chain(falling)
                .filter(|(k, _)| *k < width)
                .map(|(k, w)| w * magnitude[k])
                .sum();
            (energy + EPSILON).ln()
        })
        .collect();

    let coeffs = spectral::dct_ortho(&log_energies, N_MFCC);
    let mut out = [0.0; N_MFCC];
    out.copy_from_slice(&coeffs);
    Ok(out)
}

/// `max - mean` over equal-width bands
fn band_contrast(magnitude: &[f64]) -> Vec<f64> {
    let band = magnitude.len() / CONTRAST_BANDS;
    (0..CONTRAST_BANDS)
        .map(|i| {
            let slice = &magnitude[i * band..(i + 1) * band];
            if slice.is_empty() {
                0.0
            } else {
                slice.iter().copied().fold(f64::NEG_INFINITY, f64::max) - spectral::mean(slice)
            }
        })
        .collect()
}

fn flatness(magnitude: &[f64]) -> f64 {
    let arithmetic = spectral::mean(magnitude);
    if arithmetic > 0.0 {
        let log_mean =
            magnitude.iter().map(|m| (m + EPSILON).ln()).sum::<f64>() / magnitude.len() as f64;
        log_mean.exp() / arithmetic
    } else {
        0.0
    }
}

/// Time-domain running median as the harmonic estimate, residual as percussive
fn running_median_split(y: &[f64]) -> (f64, f64) {
    let n = y.len();
    let window = MEDIAN_WINDOW.min(n / 4);
    if window < 2 {
        return (0.5, 0.5);
    }
    let half = window / 2;
    let mut scratch = Vec::with_capacity(2 * half + 1);
    let mut harmonic_energy = 0.0;
    let mut percussive_energy = 0.0;

    for i in 0..n {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(n);
        scratch.clear();
        scratch.extend_from_slice(&y[start..end]);
        let h = spectral::median_in_place(&mut scratch);
        let p = y[i] - h;
        harmonic_energy += h * h;
        percussive_energy += p * p;
    }

    energy_split(harmonic_energy, percussive_energy, 0.0)
}
