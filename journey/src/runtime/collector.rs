use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::DEFAULT_COLLECTOR_CONCURRENCY;
use crate::job::{JobTemplate, RunTarget};
use crate::platform::{Allocation, Platform, TaskEventKind};
use crate::telemetry;
use crate::timeseries::Timeseries;

use super::pool::{Dispatcher, WorkerPool};
use super::shutdown::ShutdownToken;
use super::worker::{FailurePolicy, PoolConfig};

/// The four lifecycle series of one run, all sharing the run's start time.
#[derive(Clone, Debug)]
pub struct LifecycleSeries {
    pub registered: Timeseries,
    pub placed: Timeseries,
    pub received: Timeseries,
    pub running: Timeseries,
}

impl LifecycleSeries {
    pub fn new(base_time: DateTime<Utc>) -> Self {
        Self::with_capacity(base_time, 0)
    }

    pub fn with_capacity(base_time: DateTime<Utc>, jobs: usize) -> Self {
        Self {
            registered: Timeseries::with_capacity(base_time, jobs),
            placed: Timeseries::with_capacity(base_time, jobs),
            received: Timeseries::with_capacity(base_time, jobs),
            running: Timeseries::with_capacity(base_time, jobs),
        }
    }

    pub fn base_time(&self) -> DateTime<Utc> {
        self.registered.base_time()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
            && self.placed.is_empty()
            && self.received.is_empty()
            && self.running.is_empty()
    }

    /// Add one placed sample per allocation and one received or running
    /// sample per matching task event. Other event types are skipped.
    pub fn record_allocations(&mut self, allocations: &[Allocation]) {
        for allocation in allocations {
            self.placed.add(allocation.create_time, 1.0);
            for event in allocation.events() {
                match &event.kind {
                    TaskEventKind::Received => self.received.add(event.time, 1.0),
                    TaskEventKind::Started => self.running.add(event.time, 1.0),
                    TaskEventKind::Other(_) => {}
                }
            }
        }
    }
}

struct FetchResult {
    job_id: String,
    result: anyhow::Result<Vec<Allocation>>,
}

/// Fetches one job's allocations and hands the outcome to the coordinator.
struct AllocationFetcher<P: ?Sized> {
    platform: Arc<P>,
    results: mpsc::Sender<FetchResult>,
}

#[async_trait]
impl<P> Dispatcher<String> for AllocationFetcher<P>
where
    P: Platform + ?Sized + 'static,
{
    async fn dispatch(&self, job_id: String) -> anyhow::Result<()> {
        let result = telemetry::timed_call(
            "allocations",
            telemetry::fetch_span(&job_id),
            self.platform.allocations(&job_id),
        )
        .await;
        let allocations = result.as_ref().map_or(0, Vec::len);
        telemetry::record_allocation_fetch(&job_id, telemetry::status_label(&result), allocations);

        // a closed channel means the collection already failed
        if self.results.send(FetchResult { job_id, result }).await.is_err() {
            tracing::trace!("collector gone, dropping allocation result");
        }
        Ok(())
    }
}

/// Gathers per-job allocation histories into lifecycle series.
///
/// At most `concurrency` allocation queries are in flight at once. The first
/// failed query fails the whole collection; before the error is returned
/// every fetch worker has exited.
pub struct MetricsCollector<P: ?Sized> {
    platform: Arc<P>,
    prefix: String,
    concurrency: usize,
    shutdown: ShutdownToken,
}

impl<P> MetricsCollector<P>
where
    P: Platform + ?Sized + 'static,
{
    pub fn new(platform: Arc<P>, prefix: impl Into<String>, shutdown: ShutdownToken) -> Self {
        Self {
            platform,
            prefix: prefix.into(),
            concurrency: DEFAULT_COLLECTOR_CONCURRENCY,
            shutdown,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Collect the lifecycle series of every job under the prefix.
    ///
    /// Each listed job contributes one registered sample at its submit time
    /// carrying the template's sub-unit count.
    pub async fn collect(
        &self,
        template: &JobTemplate,
        replicas: u64,
        start: DateTime<Utc>,
    ) -> anyhow::Result<LifecycleSeries> {
        self.collect_inner(template, replicas, start)
            .instrument(telemetry::collect_span(&self.prefix, replicas))
            .await
    }

    async fn collect_inner(
        &self,
        template: &JobTemplate,
        replicas: u64,
        start: DateTime<Utc>,
    ) -> anyhow::Result<LifecycleSeries> {
        if self.shutdown.is_cancelled() {
            bail!("metrics collection cancelled");
        }

        let target = RunTarget::new(template, replicas);
        let per_job = template.sub_unit_count() as f64;

        let jobs = telemetry::timed_call(
            "list_jobs",
            telemetry::poll_span(&self.prefix),
            self.platform.list_jobs(&self.prefix),
        )
        .await
        .with_context(|| format!("failed listing jobs with prefix {:?}", self.prefix))?;

        tracing::info!(
            jobs = jobs.len(),
            expected_sub_units = target.get(),
            concurrency = self.concurrency,
            "collecting allocation histories"
        );

        let mut series = LifecycleSeries::with_capacity(start, jobs.len());
        for job in &jobs {
            series.registered.add(job.submit_time, per_job);
        }
        if jobs.is_empty() {
            return Ok(series);
        }

        let expected = jobs.len();
        let (results_tx, mut results_rx) = mpsc::channel(self.concurrency);
        let fetcher = Arc::new(AllocationFetcher {
            platform: Arc::clone(&self.platform),
            results: results_tx,
        });
        let config = PoolConfig::new("collector")
            .with_workers(self.concurrency)
            .with_queue_capacity(self.concurrency)
            .with_failure_policy(FailurePolicy::Continue);
        let pool = WorkerPool::start(config, fetcher, self.shutdown.child());

        let sender = pool.sender()?;
        let job_ids: Vec<String> = jobs.into_iter().map(|job| job.id).collect();
        let feeder = tokio::spawn(async move {
            for job_id in job_ids {
                sender.enqueue(job_id).await?;
            }
            anyhow::Ok(())
        });

        let mut received = 0usize;
        let outcome = loop {
            if received == expected {
                break Ok(());
            }
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Err(anyhow!("metrics collection cancelled")),
                next = results_rx.recv() => next,
            };
            match next {
                Some(FetchResult {
                    result: Ok(allocations),
                    ..
                }) => {
                    series.record_allocations(&allocations);
                    received += 1;
                }
                Some(FetchResult {
                    job_id,
                    result: Err(err),
                }) => {
                    break Err(
                        err.context(format!("failed fetching allocations for job {job_id:?}"))
                    );
                }
                None => {
                    break Err(anyhow!(
                        "allocation fetchers stopped after {received} of {expected} results"
                    ));
                }
            }
        };

        // closing the channel releases any worker waiting to report
        drop(results_rx);

        match outcome {
            Ok(()) => {
                feeder.await.context("allocation feeder panicked")??;
                let report = pool.finish().await?;
                tracing::debug!(fetched = report.succeeded, "allocation fetch pool drained");
                Ok(series)
            }
            Err(err) => {
                tracing::error!("metrics collection failed: {err:#}");
                if let Err(shutdown_err) = pool.shutdown().await {
                    tracing::warn!("collector pool shutdown reported: {shutdown_err:#}");
                }
                match feeder.await {
                    Ok(Err(feed_err)) => {
                        tracing::debug!("allocation feeder stopped: {feed_err:#}");
                    }
                    Err(join_err) => {
                        tracing::warn!("allocation feeder task failed: {join_err:?}");
                    }
                    Ok(Ok(())) => {}
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TaskEvent;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(kind: TaskEventKind, secs: i64) -> TaskEvent {
        TaskEvent {
            kind,
            time: at(secs),
        }
    }

    #[test]
    fn test_record_allocations_classifies_events() {
        let mut task_events = BTreeMap::new();
        task_events.insert(
            "web".to_string(),
            vec![
                event(TaskEventKind::Received, 2),
                event(TaskEventKind::parse("Task Setup"), 3),
                event(TaskEventKind::Started, 4),
            ],
        );
        task_events.insert(
            "sidecar".to_string(),
            vec![event(TaskEventKind::Received, 2)],
        );
        let allocation = Allocation {
            id: "a1".into(),
            job_id: "c1b-sleep-0".into(),
            create_time: at(1),
            task_events,
        };

        let mut series = LifecycleSeries::new(at(0));
        series.record_allocations(&[allocation]);

        assert_eq!(series.placed.len(), 1);
        assert_eq!(series.received.len(), 2);
        assert_eq!(series.running.len(), 1);
        assert!(series.registered.is_empty());
        assert_eq!(series.running.offsets(), vec![4_000]);
    }

    #[test]
    fn test_empty_series() {
        let series = LifecycleSeries::new(at(0));
        assert!(series.is_empty());
        assert_eq!(series.base_time(), at(0));
    }
}
