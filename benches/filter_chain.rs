//! Criterion benchmarks for the conditioning hot paths.
//!
//! - Per-sample cost of the live filter chain with each smoothing mode
//! - Whole-track Hampel and smoothing as run before a replay starts
//!
//! Run with: cargo bench --bench filter_chain

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use press_daq::config::{SensorRange, SmoothingKind};
use press_daq::filter::batch;
use press_daq::filter::chain::SmoothingConfig;
use press_daq::filter::{FilterChain, FilterConfig};
use std::time::{Duration, Instant};

/// Pressure-like signal with a spike every 97 samples.
fn signal(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let base = 150.0 + 20.0 * (i as f64 * 0.01).sin();
            if i % 97 == 0 {
                base + 250.0
            } else {
                base
            }
        })
        .collect()
}

fn live_chain_per_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_chain");
    let samples = signal(10_000);
    group.throughput(Throughput::Elements(samples.len() as u64));

    let modes = [
        ("none", SmoothingConfig::None),
        ("ema", SmoothingConfig::Ema { alpha: 0.25 }),
        ("boxcar", SmoothingConfig::MovingAverage { window: 5 }),
    ];
    for (name, smoothing) in modes {
        let config = FilterConfig::passthrough()
            .with_range(SensorRange::new(0.0, 400.0))
            .with_hampel(7, 3.0)
            .with_smoothing(smoothing)
            .with_deadband(0.2)
            .with_slew(500.0);
        group.bench_with_input(BenchmarkId::new("process", name), &samples, |b, samples| {
            b.iter(|| {
                let mut chain = FilterChain::new(config.clone());
                let mut at = Instant::now();
                for &x in samples {
                    at += Duration::from_millis(100);
                    black_box(chain.process(black_box(x), at));
                }
            });
        });
    }
    group.finish();
}

fn replay_batch_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_batch");
    for len in [1_000usize, 10_000, 100_000] {
        let track = signal(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("hampel_15", len), &track, |b, track| {
            b.iter(|| black_box(batch::hampel(black_box(track), 15, 3.0)));
        });
        group.bench_with_input(BenchmarkId::new("ema", len), &track, |b, track| {
            b.iter(|| {
                black_box(batch::smooth(
                    black_box(track),
                    SmoothingKind::Ema,
                    25,
                    0.08,
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, live_chain_per_sample, replay_batch_track);
criterion_main!(benches);
