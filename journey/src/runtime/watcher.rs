use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::job::RunTarget;
use crate::platform::{aggregate_totals, Platform};
use crate::progress::ProgressHandle;
use crate::telemetry;

use super::shutdown::ShutdownToken;

/// Shortest accepted poll interval; `interval_at` rejects a zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How a watcher loop ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchOutcome {
    /// A poll observed at least the target number of running sub-units.
    Reached { running: u64 },
    /// The shutdown token fired first.
    Cancelled,
}

/// Polls aggregate job state until the run target is running.
///
/// The first poll happens one interval after the loop starts. Poll failures
/// are written to the progress snapshot and the loop keeps going; once the
/// loop returns it makes no further platform calls.
pub struct ProgressWatcher<P: ?Sized> {
    platform: Arc<P>,
    prefix: String,
    target: RunTarget,
    interval: Duration,
    progress: ProgressHandle,
    shutdown: ShutdownToken,
}

impl<P> ProgressWatcher<P>
where
    P: Platform + ?Sized + 'static,
{
    pub fn new(
        platform: Arc<P>,
        prefix: impl Into<String>,
        target: RunTarget,
        progress: ProgressHandle,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            platform,
            prefix: prefix.into(),
            target,
            interval: DEFAULT_POLL_INTERVAL,
            progress,
            shutdown,
        }
    }

    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    pub fn spawn(self) -> JoinHandle<WatchOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> WatchOutcome {
        let target = self.target.get();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(prefix = %self.prefix, target = target, "progress watcher started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("progress watcher cancelled");
                    return WatchOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let result = telemetry::timed_call(
                "list_jobs",
                telemetry::poll_span(&self.prefix),
                self.platform.list_jobs(&self.prefix),
            )
            .await;

            if self.shutdown.is_cancelled() {
                tracing::debug!("progress watcher cancelled during poll");
                return WatchOutcome::Cancelled;
            }

            match result {
                Ok(jobs) => {
                    let totals = aggregate_totals(&jobs);
                    self.progress.record_poll(&totals);
                    telemetry::record_poll(totals.running, target);

                    if totals.running >= target {
                        self.progress.mark_done();
                        tracing::info!(
                            running = totals.running,
                            target = target,
                            jobs = jobs.len(),
                            "run target reached"
                        );
                        return WatchOutcome::Reached {
                            running: totals.running,
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(prefix = %self.prefix, "failed polling job status: {err:#}");
                    self.progress.record_error(&err);
                }
            }
        }
    }
}
