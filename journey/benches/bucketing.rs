//! Benchmarks for timeseries bucketing using criterion.
//!
//! Measures `bucket_by` with the cumulative count aggregator over:
//! - Samples appended in random order (first call pays for the sort)
//! - Already sorted samples (repeat calls)

#![allow(missing_docs)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use journey::{count, Timeseries};

/// Deterministic scatter of offsets across a ten minute run.
fn scattered_series(samples: u64) -> Timeseries {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut series = Timeseries::with_capacity(base, samples as usize);
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    for _ in 0..samples {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let offset_ms = (state % 600_000) as i64;
        series.add(base + chrono::Duration::milliseconds(offset_ms), 1.0);
    }
    series
}

fn bench_bucket_unsorted(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_unsorted");

    for samples in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(samples));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &samples, |b, &samples| {
            b.iter_batched(
                || scattered_series(samples),
                |mut series| black_box(series.bucket_by(Duration::from_secs(1), count)),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_bucket_sorted(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_sorted");

    for samples in [1_000u64, 10_000, 100_000] {
        let mut series = scattered_series(samples);
        series.bucket_by(Duration::from_secs(1), count);

        group.throughput(Throughput::Elements(samples));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &samples, |b, _| {
            b.iter(|| black_box(series.bucket_by(Duration::from_secs(1), count)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_bucket_unsorted, bench_bucket_sorted);
criterion_main!(benches);
