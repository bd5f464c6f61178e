//! Full-fidelity extractor: framed STFT analysis
//!
//! Frames are 2048 samples, hop 512, periodic Hann, centered with 1024 zeros
//! on each side. Per-frame descriptors are reduced by mean and population std.

use super::spectral::{self, Stft, EPSILON, FRAME_LENGTH, HOP_LENGTH, ROLLOFF_PERCENT};
use super::{
    check_cancelled, energy_split, fill_time_domain, ExtractionError, FeatureExtractor,
    FeatureVector, RawFeatures, N_MFCC,
};
use crate::signal::ConditionedSignal;
use std::f64::consts::PI;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const N_MELS: usize = 128;
const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;
const ZCR_THRESHOLD: f64 = 1e-10;
const HPSS_KERNEL: usize = 31;
/// Lower edges of the octave contrast bands; the last band runs to Nyquist
const CONTRAST_EDGES: [f64; 7] = [0.0, 200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0];

/// Non-zero span of one mel filter
struct MelFilter {
    start: usize,
    weights: Vec<f64>,
}

pub struct FullExtractor {
    sample_rate: u32,
    stft: Stft,
    mel_filters: Vec<MelFilter>,
    dct: Vec<Vec<f64>>,
    tonnetz_basis: [[f64; 12]; 6],
}

impl FullExtractor {
    pub fn new(sample_rate: u32) -> Self {
        let mel_filters = spectral::mel_filterbank(sample_rate, FRAME_LENGTH, N_MELS)
            .into_iter()
            .map(|row| {
                let start = row.iter().position(|w| *w > 0.0).unwrap_or(0);
                let end = row.iter().rposition(|w| *w > 0.0).map_or(start, |e| e + 1);
                MelFilter {
                    start,
                    weights: row[start..end].to_vec(),
                }
            })
            .collect();

        Self {
            sample_rate,
            stft: Stft::new(FRAME_LENGTH, HOP_LENGTH),
            mel_filters,
            dct: spectral::dct_matrix(N_MELS, N_MFCC),
            tonnetz_basis: tonnetz_basis(),
        }
    }

    fn bin_hz(&self) -> f64 {
        self.sample_rate as f64 / FRAME_LENGTH as f64
    }

    /// Centroid, rolloff, bandwidth per frame
    fn spectral_shape(&self, mag: &[Vec<f64>], raw: &mut RawFeatures) {
        let bin_hz = self.bin_hz();
        let mut centroids = Vec::with_capacity(mag.len());
        let mut rolloffs = Vec::with_capacity(mag.len());
        let mut bandwidths = Vec::with_capacity(mag.len());

        for frame in mag {
            let total: f64 = frame.iter().sum();
            let (centroid, bandwidth) = if total > 0.0 {
                let c = frame
                    .iter()
                    .enumerate()
                    .map(|(k, m)| k as f64 * bin_hz * m)
                    .sum::<f64>()
                    / total;
                let var = frame
                    .iter()
                    .enumerate()
                    .map(|(k, m)| m / total * (k as f64 * bin_hz - c).powi(2))
                    .sum::<f64>();
                (c, var.sqrt())
            } else {
                (0.0, 0.0)
            };

            let threshold = ROLLOFF_PERCENT * total;
            let mut cumulative = 0.0;
            let mut rolloff_bin = frame.len() - 1;
            for (k, m) in frame.iter().enumerate() {
                cumulative += m;
                if cumulative >= threshold {
                    rolloff_bin = k;
                    break;
                }
            }

            centroids.push(centroid);
            rolloffs.push(rolloff_bin as f64 * bin_hz);
            bandwidths.push(bandwidth);
        }

        raw.centroid_mean = spectral::mean(&centroids);
        raw.centroid_std = spectral::std(&centroids);
        raw.centroid_skew = spectral::skewness(&centroids);
        raw.rolloff_mean = spectral::mean(&rolloffs);
        raw.rolloff_std = spectral::std(&rolloffs);
        raw.bandwidth_mean = spectral::mean(&bandwidths);
        raw.bandwidth_std = spectral::std(&bandwidths);
        raw.centroid_normalized = raw.centroid_mean / (self.sample_rate as f64 / 2.0);
    }

    /// Power mel spectrogram in dB, 80 dB floor below the global peak
    fn mel_db(&self, mag: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut db: Vec<Vec<f64>> = mag
            .iter()
            .map(|frame| {
                self.mel_filters
                    .iter()
                    .map(|filter| {
                        let power: f64 = filter
                            .weights
                            .iter()
                            .zip(&frame[filter.start..])
                            .map(|(w, m)| w * m * m)
                            .sum();
                        10.0 * power.max(AMIN).log10()
                    })
                    .collect()
            })
            .collect();

        let peak = db
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = peak - TOP_DB;
        for v in db.iter_mut().flatten() {
            *v = v.max(floor);
        }
        db
    }

    fn mfcc(&self, mel_db: &[Vec<f64>], raw: &mut RawFeatures) {
        let mut coeffs = vec![Vec::with_capacity(mel_db.len()); N_MFCC];
        for frame in mel_db {
            for (c, row) in self.dct.iter().enumerate() {
                coeffs[c].push(row.iter().zip(frame).map(|(w, x)| w * x).sum());
            }
        }
        for (c, series) in coeffs.iter().enumerate() {
            raw.mfcc_mean[c] = spectral::mean(series);
            raw.mfcc_std[c] = spectral::std(series);
        }
    }

    fn chroma_tonnetz(&self, mag: &[Vec<f64>], raw: &mut RawFeatures) {
        let bin_hz = self.bin_hz();
        let chroma: Vec<[f64; 12]> = mag
            .iter()
            .map(|frame| spectral::fold_chroma(frame, bin_hz))
            .collect();

        let frames = chroma.len() as f64;
        for (i, bin) in raw.chroma_bins.iter_mut().enumerate() {
            *bin = chroma.iter().map(|c| c[i]).sum::<f64>() / frames;
        }
        let flat: Vec<f64> = chroma.iter().flatten().copied().collect();
        raw.chroma_mean = spectral::mean(&flat);
        raw.chroma_std = spectral::std(&flat);

        let tonnetz: Vec<f64> = chroma
            .iter()
            .flat_map(|c| {
                self.tonnetz_basis
                    .iter()
                    .map(move |axis| axis.iter().zip(c).map(|(w, x)| w * x).sum::<f64>())
            })
            .collect();
        raw.tonnetz_mean = spectral::mean(&tonnetz);
        raw.tonnetz_std = spectral::std(&tonnetz);
    }

    fn rhythm(
        &self,
        mel_db: &[Vec<f64>],
        n_samples: usize,
        raw: &mut RawFeatures,
    ) -> Result<(), ExtractionError> {
        let envelope = onset_envelope(mel_db);
        let frame_rate = self.sample_rate as f64 / HOP_LENGTH as f64;
        let autocorr = spectral::autocorrelation(&envelope)?;
        let tempo = spectral::tempo_from_autocorrelation(&autocorr, frame_rate);

        let beats = pick_beats(&envelope, frame_rate * 60.0 / tempo);
        let duration = n_samples as f64 / self.sample_rate as f64;

        raw.tempo = tempo;
        raw.beat_strength = if duration > 0.0 {
            beats as f64 / duration
        } else {
            0.0
        };
        trace!(tempo, beats, "Rhythm analysis complete");
        Ok(())
    }

    fn contrast_flatness(&self, mag: &[Vec<f64>], raw: &mut RawFeatures) {
        let bin_hz = self.bin_hz();
        let nyquist = self.sample_rate as f64 / 2.0;
        let mut contrast = Vec::with_capacity(mag.len() * CONTRAST_EDGES.len());
        let mut flatness = Vec::with_capacity(mag.len());

        for frame in mag {
            for (band, &lo) in CONTRAST_EDGES.iter().enumerate() {
                let last = band + 1 == CONTRAST_EDGES.len();
                let hi = CONTRAST_EDGES.get(band + 1).copied().unwrap_or(nyquist);
                let values: Vec<f64> = frame
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| {
                        let f = *k as f64 * bin_hz;
                        f >= lo && (f < hi || (last && f <= hi))
                    })
                    .map(|(_, m)| *m)
                    .collect();
                contrast.push(if values.is_empty() {
                    0.0
                } else {
                    values.iter().copied().fold(f64::NEG_INFINITY, f64::max) - spectral::mean(&values)
                });
            }

            let arithmetic = spectral::mean(frame);
            flatness.push(if arithmetic > 0.0 {
                let log_mean =
                    frame.iter().map(|m| (m + EPSILON).ln()).sum::<f64>() / frame.len() as f64;
                log_mean.exp() / arithmetic
            } else {
                0.0
            });
        }

        raw.contrast_mean = spectral::mean(&contrast);
        raw.contrast_std = spectral::std(&contrast);
        raw.flatness_mean = spectral::mean(&flatness);
        raw.flatness_std = spectral::std(&flatness);
    }

    /// Median-filter HPSS on the magnitude spectrogram with power-2 soft masks
    fn harmonic_percussive(&self, mag: &[Vec<f64>], raw: &mut RawFeatures) {
        let frames = mag.len();
        let bins = mag.first().map_or(0, Vec::len);
        if frames < HPSS_KERNEL || bins < HPSS_KERNEL {
            raw.harmonic_ratio = 0.5;
            raw.percussive_ratio = 0.5;
            return;
        }

        let half = (HPSS_KERNEL / 2) as isize;
        let mut window = vec![0.0; HPSS_KERNEL];
        let mut harmonic_energy = 0.0;
        let mut percussive_energy = 0.0;

        for t in 0..frames {
            for k in 0..bins {
                for (slot, d) in window.iter_mut().zip(-half..=half) {
                    *slot = mag[spectral::reflect_index(t as isize + d, frames)][k];
                }
                let h = spectral::median_in_place(&mut window);

                for (slot, d) in window.iter_mut().zip(-half..=half) {
                    *slot = mag[t][spectral::reflect_index(k as isize + d, bins)];
                }
                let p = spectral::median_in_place(&mut window);

                let (h2, p2) = (h * h, p * p);
                let denom = h2 + p2;
                if denom > f64::MIN_POSITIVE {
                    let m = mag[t][k];
                    harmonic_energy += (m * h2 / denom).powi(2);
                    percussive_energy += (m * p2 / denom).powi(2);
                }
            }
        }

        let (h, p) = energy_split(harmonic_energy, percussive_energy, EPSILON);
        raw.harmonic_ratio = h;
        raw.percussive_ratio = p;
    }
}

impl FeatureExtractor for FullExtractor {
    fn name(&self) -> &'static str {
        "full"
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
        let mut raw = RawFeatures::default();

        fill_time_domain(&y, signal.target_len(), &mut raw);
        let (zcr_mean, zcr_std) = zero_crossing_rate(&y);
        raw.zcr_mean = zcr_mean;
        raw.zcr_std = zcr_std;
        check_cancelled(cancel)?;

        let mag = self.stft.magnitude(&y)?;
        self.spectral_shape(&mag, &mut raw);
        check_cancelled(cancel)?;

        let mel_db = self.mel_db(&mag);
        self.mfcc(&mel_db, &mut raw);
        check_cancelled(cancel)?;

        self.chroma_tonnetz(&mag, &mut raw);
        check_cancelled(cancel)?;

        self.rhythm(&mel_db, y.len(), &mut raw)?;
        check_cancelled(cancel)?;

        self.contrast_flatness(&mag, &mut raw);
        check_cancelled(cancel)?;

        self.harmonic_percussive(&mag, &mut raw);

        raw.into_vector()
    }
}

/// Tonnetz axes: fifths, minor thirds, major thirds (sine and cosine each)
fn tonnetz_basis() -> [[f64; 12]; 6] {
    let axes = [
        (7.0 * PI / 6.0, 1.0),
        (3.0 * PI / 2.0, 1.0),
        (2.0 * PI / 3.0, 0.5),
    ];
    let mut basis = [[0.0; 12]; 6];
    for (a, (angle, radius)) in axes.iter().enumerate() {
        for n in 0..12 {
            basis[2 * a][n] = radius * (n as f64 * angle).sin();
            basis[2 * a + 1][n] = radius * (n as f64 * angle).cos();
        }
    }
    basis
}

/// Frame-wise zero-crossing rate over edge-padded frames
fn zero_crossing_rate(y: &[f64]) -> (f64, f64) {
    let pad = FRAME_LENGTH / 2;
    let first = y.first().copied().unwrap_or(0.0);
    let last = y.last().copied().unwrap_or(0.0);

    let positive = |x: f64| {
        let x = if x.abs() <= ZCR_THRESHOLD { 0.0 } else { x };
        x >= 0.0
    };

    let padded: Vec<bool> = std::iter::repeat(first)
        .take(pad)
        .chain(y.iter().copied())
        .chain(std::iter::repeat(last).take(pad))
        .map(positive)
        .collect();

    // prefix[j] = crossings between positions (i-1, i) for i in 1..=j
    let mut prefix = vec![0usize; padded.len()];
    for j in 1..padded.len() {
        prefix[j] = prefix[j - 1] + usize::from(padded[j] != padded[j - 1]);
    }

    let frames = 1 + y.len() / HOP_LENGTH;
    let rates: Vec<f64> = (0..frames)
        .map(|t| {
            let start = t * HOP_LENGTH;
            let end = (start + FRAME_LENGTH - 1).min(padded.len() - 1);
            (prefix[end] - prefix[start]) as f64 / FRAME_LENGTH as f64
        })
        .collect();

    (spectral::mean(&rates), spectral::std(&rates))
}

/// Mean positive first difference of the dB mel spectrogram, one value per frame
fn onset_envelope(mel_db: &[Vec<f64>]) -> Vec<f64> {
    let mut envelope = vec![0.0; mel_db.len()];
    for t in 1..mel_db.len() {
        let rise: f64 = mel_db[t]
            .iter()
            .zip(&mel_db[t - 1])
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();
        envelope[t] = rise / mel_db[t].len() as f64;
    }
    envelope
}

/// Envelope peaks above the envelope mean, at least half a beat period apart
fn pick_beats(envelope: &[f64], period_frames: f64) -> usize {
    let threshold = spectral::mean(envelope);
    let min_gap = period_frames / 2.0;
    let mut last: Option<usize> = None;
    let mut count = 0;

    for i in spectral::local_maxima(envelope) {
        if envelope[i] <= threshold {
            continue;
        }
        if last.map_or(true, |l| (i - l) as f64 >= min_gap) {
            last = Some(i);
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ResampleMethod, SignalConditioner};

    const SR: u32 = 22050;

    fn condition(samples: Vec<f32>) -> ConditionedSignal {
        SignalConditioner::new(SR, SR as usize * 2, ResampleMethod::Sinc)
            .condition_samples(&samples, SR)
            .unwrap()
    }

    fn sine(freq: f64, secs: f64) -> Vec<f32> {
        (0..(SR as f64 * secs) as usize)
            .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / SR as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_all_zero_signal() {
        let extractor = FullExtractor::new(SR);
        let v = extractor
            .extract(&condition(vec![0.0; 100]), &CancellationToken::new())
            .unwrap();

        assert_eq!(v.get("silence_ratio"), Some(1.0));
        assert_eq!(v.get("rms_energy_ratio"), Some(0.0));
        assert_eq!(v.get("harmonic_ratio"), Some(0.5));
        assert_eq!(v.get("percussive_ratio"), Some(0.5));
        assert_eq!(v.get("tempo"), Some(120.0));
        assert_eq!(v.get("spectral_centroid_skew"), Some(0.0));
        assert_eq!(v.get("zcr_mean"), Some(0.0));
    }

    #[test]
    fn test_sine_centroid_and_chroma() {
        let extractor = FullExtractor::new(SR);
        let v = extractor
            .extract(&condition(sine(440.0, 2.0)), &CancellationToken::new())
            .unwrap();

        let centroid = v.get("spectral_centroid_mean").unwrap();
        assert!((centroid - 440.0).abs() < 60.0, "centroid {}", centroid);
        let a_bin = v.get("chroma_bin_0").unwrap();
        for i in 1..12 {
            assert!(a_bin > v.get(&format!("chroma_bin_{}", i)).unwrap());
        }
        let h = v.get("harmonic_ratio").unwrap();
        let p = v.get("percussive_ratio").unwrap();
        assert!(h > p, "steady tone should be mostly harmonic");
        assert!((h + p - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cancellation_stops_extraction() {
        let extractor = FullExtractor::new(SR);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            extractor.extract(&condition(sine(220.0, 1.0)), &cancel),
            Err(ExtractionError::Cancelled)
        );
    }

    #[test]
    fn test_zcr_alternating_signal() {
        // 9 centered frames: 5 interior at 2047/2048, edge frames diluted by padding
        let y: Vec<f64> = (0..4096).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let (mean, std) = zero_crossing_rate(&y);

        let expected = (2 * 1023 + 2 * 1535 + 5 * 2047) as f64 / 2048.0 / 9.0;
        assert!((mean - expected).abs() < 1e-12, "mean {}", mean);
        assert!(std > 0.0);
    }

    #[test]
    fn test_tonnetz_basis_radii() {
        let basis = tonnetz_basis();
        assert_eq!(basis[1][0], 1.0);
        assert_eq!(basis[3][0], 1.0);
        assert_eq!(basis[5][0], 0.5);
        assert_eq!(basis[0][0], 0.0);
    }

    #[test]
    fn test_pick_beats_respects_gap() {
        let mut env = vec![0.0; 40];
        for i in [5, 7, 20, 35] {
            env[i] = 1.0;
        }
        assert_eq!(pick_beats(&env, 10.0), 3);
    }
}
