use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::HarnessConfig;
use crate::job::{derive_instance, ensure_schedulable, JobTemplate, RunTarget};
use crate::platform::Platform;
use crate::progress::ProgressHandle;
use crate::report::MetricsReport;
use crate::telemetry;
use crate::timeseries::MIN_STRIDE;

use super::collector::{LifecycleSeries, MetricsCollector};
use super::pool::{start_dispatch_pool, start_teardown_pool, PoolReport};
use super::shutdown::ShutdownToken;
use super::watcher::{ProgressWatcher, WatchOutcome};

/// Result of a submission run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Time the run began; pass it to metrics collection.
    pub start_time: DateTime<Utc>,
    pub jobs: u64,
    pub target: RunTarget,
    pub dispatch: PoolReport,
    pub outcome: WatchOutcome,
}

impl RunSummary {
    pub fn reached_target(&self) -> bool {
        matches!(self.outcome, WatchOutcome::Reached { .. })
    }
}

/// Result of deregistering a prefix.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StopSummary {
    pub listed: usize,
    pub deregistered: u64,
    /// Teardown workers spawned, at most one per listed job.
    pub workers: usize,
}

/// Drives submission runs, teardown, and metrics collection against one
/// platform.
///
/// All work started by the harness observes its shutdown token; cancelling
/// it stops pools, the watcher, and any collection in progress.
pub struct Harness<P: ?Sized> {
    config: HarnessConfig,
    platform: Arc<P>,
    shutdown: ShutdownToken,
    progress: ProgressHandle,
}

impl<P: ?Sized> fmt::Debug for Harness<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .field("platform_type", &type_name::<P>())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<P> Harness<P>
where
    P: Platform + ?Sized + 'static,
{
    pub(crate) fn new(config: HarnessConfig, platform: Arc<P>, shutdown: ShutdownToken) -> Self {
        Self {
            config,
            platform,
            shutdown,
            progress: ProgressHandle::default(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Shared progress of the current or latest run.
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Submit `job_count` instances of `template` and wait until the run
    /// target is running or the harness is cancelled.
    ///
    /// Failed submissions are logged and counted but do not end the run.
    pub async fn start(&self, template: &JobTemplate) -> anyhow::Result<RunSummary> {
        self.config.validate()?;
        ensure_schedulable(template)?;
        let jobs = self.config.job_count;
        if jobs == 0 {
            bail!("job count must be greater than zero");
        }

        let target = RunTarget::new(template, jobs);
        let start_time = Utc::now();
        tracing::info!(
            start_time = %start_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            unix = start_time.timestamp(),
            jobs = jobs,
            target = target.get(),
            workers = self.config.dispatch_workers,
            "starting run"
        );

        self.progress.reset(target.get());
        let watcher = ProgressWatcher::new(
            Arc::clone(&self.platform),
            self.config.job_prefix.clone(),
            target,
            self.progress.clone(),
            self.shutdown.child(),
        )
        .with_interval(self.config.poll_interval)
        .spawn();

        let pool = start_dispatch_pool(
            self.config.dispatch_workers,
            self.config.queue_capacity,
            Arc::clone(&self.platform),
            self.shutdown.child(),
        );
        for sequence in 0..jobs {
            let instance = derive_instance(template, &self.config.job_prefix, sequence);
            if let Err(err) = pool.enqueue(instance).await {
                tracing::warn!(queued = sequence, "stopped queueing submissions: {err:#}");
                break;
            }
        }
        let dispatch = pool.finish().await?;
        tracing::info!(
            succeeded = dispatch.succeeded,
            failed = dispatch.failed,
            "submissions dispatched"
        );

        let outcome = watcher.await.context("progress watcher panicked")?;
        match outcome {
            WatchOutcome::Reached { running } => {
                tracing::info!(
                    running = running,
                    elapsed = ?(Utc::now() - start_time),
                    "run complete"
                );
            }
            WatchOutcome::Cancelled => tracing::warn!("run cancelled before reaching target"),
        }

        Ok(RunSummary {
            start_time,
            jobs,
            target,
            dispatch,
            outcome,
        })
    }

    /// Deregister every job under the configured prefix.
    ///
    /// The first failed deregistration stops the remaining work and is
    /// returned once every teardown worker has exited.
    pub async fn stop(&self) -> anyhow::Result<StopSummary> {
        self.config.validate()?;
        let prefix = &self.config.job_prefix;

        let jobs = telemetry::timed_call(
            "list_jobs",
            telemetry::poll_span(prefix),
            self.platform.list_jobs(prefix),
        )
        .await
        .with_context(|| format!("failed listing jobs with prefix {prefix:?}"))?;

        if jobs.is_empty() {
            tracing::info!(prefix = %prefix, "no jobs to deregister");
            return Ok(StopSummary::default());
        }

        let listed = jobs.len();
        let workers = self.config.teardown_workers.min(listed);
        tracing::info!(jobs = listed, workers = workers, "deregistering jobs");

        let pool = start_teardown_pool(
            workers,
            self.config.queue_capacity,
            Arc::clone(&self.platform),
            self.shutdown.child(),
        );
        for job in jobs {
            if let Err(err) = pool.enqueue(job.id).await {
                tracing::debug!("stopped queueing deregistrations: {err:#}");
                break;
            }
        }
        let report = pool.finish().await.context("teardown aborted")?;

        if self.shutdown.is_cancelled() {
            bail!(
                "teardown cancelled after {} of {} deregistrations",
                report.succeeded,
                listed
            );
        }

        tracing::info!(deregistered = report.succeeded, "teardown complete");
        Ok(StopSummary {
            listed,
            deregistered: report.succeeded,
            workers: report.workers,
        })
    }

    /// Collect the raw lifecycle series of a run that began at `start`.
    pub async fn collect_series(
        &self,
        template: &JobTemplate,
        start: DateTime<Utc>,
    ) -> anyhow::Result<LifecycleSeries> {
        self.config.validate()?;
        MetricsCollector::new(
            Arc::clone(&self.platform),
            self.config.job_prefix.clone(),
            self.shutdown.clone(),
        )
        .with_concurrency(self.config.collector_concurrency)
        .collect(template, self.config.job_count, start)
        .await
    }

    /// Collect a run's lifecycle series and bucket them per second.
    pub async fn collect_metrics(
        &self,
        template: &JobTemplate,
        start: DateTime<Utc>,
    ) -> anyhow::Result<MetricsReport> {
        let mut series = self.collect_series(template, start).await?;
        Ok(MetricsReport::from_series(&mut series, MIN_STRIDE))
    }
}
