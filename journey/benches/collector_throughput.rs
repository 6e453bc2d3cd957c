//! Benchmarks for metrics collection throughput using criterion.
//!
//! Collects allocation histories from an in-memory platform with a small
//! per-call delay, at several concurrency limits, to show how the fan-out
//! scales with the number of fetch workers.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use journey::{instance_id, MetricsCollector, ShutdownToken};
use journey_testkit::{
    at, base_time, job_summary, sample_template, started_allocation, FakePlatform,
};

const JOBS: u64 = 200;

fn seeded_platform(delay: Duration) -> FakePlatform {
    let platform = FakePlatform::new().with_delay(delay);
    for seq in 0..JOBS {
        let id = instance_id("bench-", "sleep", seq);
        platform.insert_job(job_summary(&id, at(seq as i64), 0));
        platform.set_allocations(
            &id,
            (0..3)
                .map(|i| started_allocation(&id, i, 1_000, 1_500, 2_000 + seq as i64))
                .collect(),
        );
    }
    platform
}

fn bench_collect(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("create tokio runtime");
    let template = sample_template();
    let platform = Arc::new(seeded_platform(Duration::from_micros(200)));

    let mut group = c.benchmark_group("collect");
    group.throughput(Throughput::Elements(JOBS));
    group.sample_size(20);

    for concurrency in [1usize, 5, 20] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let collector =
                        MetricsCollector::new(Arc::clone(&platform), "bench-", ShutdownToken::new())
                            .with_concurrency(concurrency);
                    let template = template.clone();
                    async move {
                        let series = collector
                            .collect(&template, JOBS, base_time())
                            .await
                            .expect("collect");
                        assert_eq!(series.placed.len(), (JOBS * 3) as usize);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_collect);
criterion_main!(benches);
