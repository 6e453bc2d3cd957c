use std::sync::Arc;
use std::time::Duration;

use journey::{count, instance_id, MetricsCollector, ShutdownToken};
use journey_testkit::{
    at, base_time, job_summary, sample_template, started_allocation, Capability, FakePlatform,
};
use tokio::time::timeout;

const PREFIX: &str = "c1b-";

fn seed_jobs(platform: &FakePlatform, jobs: u64) -> Vec<String> {
    (0..jobs)
        .map(|seq| {
            let id = instance_id(PREFIX, "sleep", seq);
            platform.insert_job(job_summary(&id, at(100 * seq as i64), 0));
            platform.set_allocations(
                &id,
                vec![started_allocation(&id, 0, 1_000, 2_000, 3_000)],
            );
            id
        })
        .collect()
}

fn collector(
    platform: &FakePlatform,
    concurrency: usize,
    shutdown: ShutdownToken,
) -> MetricsCollector<FakePlatform> {
    MetricsCollector::new(Arc::new(platform.clone()), PREFIX, shutdown)
        .with_concurrency(concurrency)
}

#[tokio::test]
async fn test_zero_jobs_yields_empty_series() {
    let platform = FakePlatform::new();
    let series = collector(&platform, 4, ShutdownToken::new())
        .collect(&sample_template(), 10, base_time())
        .await
        .unwrap();
    assert!(series.is_empty());
    assert!(platform.allocation_calls().is_empty());
}

#[tokio::test]
async fn test_single_job_single_allocation() {
    let platform = FakePlatform::new();
    seed_jobs(&platform, 1);

    let mut series = collector(&platform, 4, ShutdownToken::new())
        .collect(&sample_template(), 1, base_time())
        .await
        .unwrap();

    assert_eq!(series.placed.offsets(), vec![1_000]);
    assert_eq!(series.received.offsets(), vec![2_000]);
    assert_eq!(series.running.offsets(), vec![3_000]);

    // one registered sample carrying the template's sub-unit count
    assert_eq!(series.registered.offsets(), vec![0]);
    assert_eq!(series.registered.bucket_by(Duration::from_secs(1), count), vec![3.0]);
}

#[tokio::test]
async fn test_job_without_allocations_is_still_registered() {
    let platform = FakePlatform::new();
    let placed = instance_id(PREFIX, "sleep", 0);
    let unplaced = instance_id(PREFIX, "sleep", 1);
    platform.insert_job(job_summary(&placed, at(0), 0));
    platform.insert_job(job_summary(&unplaced, at(100), 0));
    platform.set_allocations(&placed, vec![started_allocation(&placed, 0, 1_000, 2_000, 3_000)]);

    let series = collector(&platform, 2, ShutdownToken::new())
        .collect(&sample_template(), 2, base_time())
        .await
        .unwrap();

    assert_eq!(series.placed.len(), 1);
    assert_eq!(series.running.len(), 1);
    assert_eq!(series.registered.len(), 2);
    assert_eq!(platform.allocation_calls().len(), 2);
}

#[tokio::test]
async fn test_every_job_fetched_once_within_concurrency_limit() {
    let platform = FakePlatform::new().with_delay(Duration::from_millis(5));
    let ids = seed_jobs(&platform, 40);

    let mut series = timeout(
        Duration::from_secs(10),
        collector(&platform, 4, ShutdownToken::new()).collect(&sample_template(), 40, base_time()),
    )
    .await
    .expect("collection hung")
    .unwrap();

    let mut calls = platform.allocation_calls();
    calls.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(calls, expected);

    let max = platform.max_concurrent_allocation_calls();
    assert!(max <= 4, "saw {max} concurrent fetches");
    assert!(max > 1, "fetches never overlapped");

    assert_eq!(series.placed.len(), 40);
    let running = series.running.bucket_by(Duration::from_secs(1), count);
    assert_eq!(running, vec![0.0, 0.0, 0.0, 40.0]);
}

#[tokio::test]
async fn test_first_fetch_error_fails_collection_and_joins_workers() {
    let platform = FakePlatform::new().with_delay(Duration::from_millis(2));
    seed_jobs(&platform, 30);
    let failing = instance_id(PREFIX, "sleep", 5);
    platform.fail_job(Capability::Allocations, &failing);

    let err = timeout(
        Duration::from_secs(10),
        collector(&platform, 3, ShutdownToken::new()).collect(&sample_template(), 30, base_time()),
    )
    .await
    .expect("collection hung after an error")
    .unwrap_err();
    assert!(format!("{err:#}").contains(&failing), "unexpected error: {err:#}");

    // every fetch worker has exited, so no more calls arrive
    let calls = platform.allocation_calls().len();
    assert!(calls <= 30);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(platform.allocation_calls().len(), calls);
}

#[tokio::test]
async fn test_list_failure_is_fatal() {
    let platform = FakePlatform::new();
    platform.fail(Capability::List);
    let err = collector(&platform, 2, ShutdownToken::new())
        .collect(&sample_template(), 1, base_time())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("failed listing jobs"));
}

#[tokio::test]
async fn test_cancellation_aborts_collection() {
    let platform = FakePlatform::new().with_delay(Duration::from_millis(20));
    seed_jobs(&platform, 50);
    let shutdown = ShutdownToken::new();

    let task = tokio::spawn({
        let collector = collector(&platform, 2, shutdown.clone());
        async move { collector.collect(&sample_template(), 50, base_time()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let result = timeout(Duration::from_secs(5), task)
        .await
        .expect("collection ignored cancellation")
        .unwrap();
    assert!(result.unwrap_err().to_string().contains("cancelled"));
    assert!(platform.allocation_calls().len() < 50);
}
