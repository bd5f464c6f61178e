//! Numeric building blocks shared by both extractors
//!
//! Statistics follow population conventions (divide by N). Percentiles use
//! linear interpolation between closest ranks.

use super::ExtractionError;
use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

pub const EPSILON: f64 = 1e-8;
pub const FRAME_LENGTH: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const ROLLOFF_PERCENT: f64 = 0.85;
pub const SILENCE_THRESHOLD: f64 = 0.01;
pub const TEMPO_MIN: f64 = 60.0;
pub const TEMPO_MAX: f64 = 200.0;
pub const TEMPO_DEFAULT: f64 = 120.0;

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

pub fn std(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    (data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Third standardized moment; 0.0 when the data has zero spread
pub fn skewness(data: &[f64]) -> f64 {
    let s = std(data);
    if s == 0.0 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| ((x - m) / s).powi(3)).sum::<f64>() / data.len() as f64
}

/// Percentile of already-sorted data (`p` in 0..=100)
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median of a scratch buffer (reordered in place); even counts average the middle pair
pub fn median_in_place(buf: &mut [f64]) -> f64 {
    let n = buf.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    let (lower, upper, _) = buf.select_nth_unstable_by(mid, f64::total_cmp);
    if n % 2 == 1 {
        *upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + *upper) / 2.0
    }
}

/// Half-sample symmetric index (`d c b a | a b c d | d c b a`)
pub fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Periodic Hann window (DFT-even), used for STFT frames
pub fn hann_periodic(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos())
        .collect()
}

/// Symmetric Hann window
pub fn hann_symmetric(size: usize) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (size - 1) as f64).cos())
        .collect()
}

/// Orthonormal DCT-II, returning the first `n_out` coefficients
pub fn dct_ortho(input: &[f64], n_out: usize) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return vec![0.0; n_out];
    }
    let nf = n as f64;
    (0..n_out)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * nf)).cos())
                .sum();
            let scale = if k == 0 {
                (1.0 / nf).sqrt()
            } else {
                (2.0 / nf).sqrt()
            };
            sum * scale
        })
        .collect()
}

/// Precomputed orthonormal DCT-II rows (`n_out x n_in`)
pub fn dct_matrix(n_in: usize, n_out: usize) -> Vec<Vec<f64>> {
    let nf = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / nf).sqrt()
            } else {
                (2.0 / nf).sqrt()
            };
            (0..n_in)
                .map(|i| scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * nf)).cos())
                .collect()
        })
        .collect()
}

fn hz_to_mel_slaney(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz_slaney(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-style mel filterbank (`n_mels x (n_fft/2 + 1)`) from 0 Hz to Nyquist, area-normalized
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let mel_max = hz_to_mel_slaney(nyquist);
    let mel_f: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz_slaney(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let lower_width = mel_f[m + 1] - mel_f[m];
            let upper_width = mel_f[m + 2] - mel_f[m + 1];
            let enorm = 2.0 / (mel_f[m + 2] - mel_f[m]);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - mel_f[m]) / lower_width;
                    let upper = (mel_f[m + 2] - f) / upper_width;
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Pitch class of a frequency: `round(12 * log2(f / 440)) mod 12`
pub fn pitch_class(freq: f64) -> usize {
    let semitones = (12.0 * (freq / 440.0).log2()).round() as i64;
    semitones.rem_euclid(12) as usize
}

/// Fold a magnitude spectrum into 12 pitch classes, normalized to sum 1
///
/// The DC bin is skipped. An all-zero spectrum stays all-zero.
pub fn fold_chroma(magnitude: &[f64], bin_hz: f64) -> [f64; 12] {
    let mut chroma = [0.0; 12];
    for (k, &m) in magnitude.iter().enumerate().skip(1) {
        chroma[pitch_class(k as f64 * bin_hz)] += m;
    }
    let total: f64 = chroma.iter().sum();
    if total > 0.0 {
        for c in chroma.iter_mut() {
            *c /= total;
        }
    }
    chroma
}

/// Indices of strict local maxima (`x[i-1] < x[i] > x[i+1]`)
pub fn local_maxima(data: &[f64]) -> Vec<usize> {
    if data.len() < 3 {
        return Vec::new();
    }
    (1..data.len() - 1)
        .filter(|&i| data[i] > data[i - 1] && data[i] > data[i + 1])
        .collect()
}

/// Tempo from the mean spacing of autocorrelation peaks
///
/// `lag_rate` converts lag units to seconds (`sr` for samples, `sr / hop` for frames).
/// Falls back to 120 BPM with fewer than two peaks or a non-finite estimate.
pub fn tempo_from_autocorrelation(autocorr: &[f64], lag_rate: f64) -> f64 {
    let peaks = local_maxima(autocorr);
    if peaks.len() < 2 {
        return TEMPO_DEFAULT;
    }
    let spacing = (peaks[peaks.len() - 1] - peaks[0]) as f64 / (peaks.len() - 1) as f64;
    let tempo = 60.0 * lag_rate / spacing;
    if tempo.is_finite() {
        tempo.clamp(TEMPO_MIN, TEMPO_MAX)
    } else {
        TEMPO_DEFAULT
    }
}

/// Non-negative-lag autocorrelation of `data`, computed by zero-padded FFT
pub fn autocorrelation(data: &[f64]) -> Result<Vec<f64>, ExtractionError> {
    let n = data.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let size = (2 * n).next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut input = forward.make_input_vec();
    input[..n].copy_from_slice(data);
    let mut spectrum = forward.make_output_vec();
    forward
        .process(&mut input, &mut spectrum)
        .map_err(|e| ExtractionError::Fft(e.to_string()))?;

    for c in spectrum.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }

    let mut output = inverse.make_output_vec();
    inverse
        .process(&mut spectrum, &mut output)
        .map_err(|e| ExtractionError::Fft(e.to_string()))?;

    let scale = size as f64;
    Ok(output[..n].iter().map(|v| v / scale).collect())
}

/// Magnitude spectrogram (`frames x (n_fft/2 + 1)`) of centered, zero-padded Hann frames
pub struct Stft {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    n_fft: usize,
    hop: usize,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        Self {
            fft: planner.plan_fft_forward(n_fft),
            window: hann_periodic(n_fft),
            n_fft,
            hop,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of centered frames for a signal of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    pub fn magnitude(&self, samples: &[f64]) -> Result<Vec<Vec<f64>>, ExtractionError> {
        let pad = (self.n_fft / 2) as isize;
        let frames = self.frame_count(samples.len());
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut out = Vec::with_capacity(frames);

        for t in 0..frames {
            let start = (t * self.hop) as isize - pad;
            for (i, slot) in input.iter_mut().enumerate() {
                let idx = start + i as isize;
                let sample = if idx >= 0 {
                    samples.get(idx as usize).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                *slot = sample * self.window[i];
            }
            self.fft
                .process(&mut input, &mut spectrum)
                .map_err(|e| ExtractionError::Fft(e.to_string()))?;
            out.push(spectrum.iter().map(|c| c.norm()).collect());
        }

        Ok(out)
    }
}
