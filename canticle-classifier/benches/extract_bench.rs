//! Feature Extraction Throughput Benchmark
//!
//! Measures one canonical 10 s window (22050 Hz) through each extractor and
//! through conditioning from common native rates.
//!
//! **Goal:** classify faster than realtime on a single worker
//! **Target:** full extractor under 1 s per window, reduced under 50 ms

use canticle_classifier::features::{FeatureExtractor, FullExtractor, ReducedExtractor};
use canticle_classifier::signal::{ResampleMethod, SignalConditioner};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::f32::consts::PI;
use tokio_util::sync::CancellationToken;

const SAMPLE_RATE: u32 = 22050;
const TARGET_LEN: usize = SAMPLE_RATE as usize * 10;

/// Two tones plus a click track, so every feature group does real work
fn test_signal(rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / rate as f32;
            let tone = 0.3 * (2.0 * PI * 220.0 * t).sin() + 0.2 * (2.0 * PI * 330.0 * t).sin();
            let click = if i % (rate as usize / 2) < 64 { 0.4 } else { 0.0 };
            tone + click
        })
        .collect()
}

fn bench_extractors(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    group.sample_size(10);
    group.throughput(Throughput::Elements(TARGET_LEN as u64));

    let conditioner = SignalConditioner::new(SAMPLE_RATE, TARGET_LEN, ResampleMethod::Sinc);
    let conditioned = conditioner
        .condition_samples(&test_signal(SAMPLE_RATE, TARGET_LEN), SAMPLE_RATE)
        .expect("Failed to condition signal");
    let cancel = CancellationToken::new();

    let extractors: [(&str, Box<dyn FeatureExtractor>); 2] = [
        ("full", Box::new(FullExtractor::new(SAMPLE_RATE))),
        ("reduced", Box::new(ReducedExtractor::new(SAMPLE_RATE))),
    ];

    for (name, extractor) in &extractors {
        group.bench_with_input(BenchmarkId::from_parameter(name), &conditioned, |b, signal| {
            b.iter(|| {
                extractor
                    .extract(black_box(signal), &cancel)
                    .expect("Extraction failed")
            })
        });
    }

    group.finish();
}

fn bench_conditioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition");
    group.sample_size(20);

    for native_rate in [22050u32, 44100, 48000] {
        let input = test_signal(native_rate, native_rate as usize * 10);
        for method in [ResampleMethod::Linear, ResampleMethod::Sinc] {
            let conditioner = SignalConditioner::new(SAMPLE_RATE, TARGET_LEN, method);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", method).to_lowercase(), native_rate),
                &input,
                |b, samples| {
                    b.iter(|| {
                        conditioner
                            .condition_samples(black_box(samples), native_rate)
                            .expect("Conditioning failed")
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_extractors, bench_conditioning);
criterion_main!(benches);
