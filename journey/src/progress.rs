use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::platform::GroupSummary;

/// Point-in-time view of a run as last observed by the watcher.
///
/// `running` is whatever the platform reported on the latest poll and may go
/// down as well as up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub running: u64,
    pub target: u64,
    pub queued: u64,
    pub starting: u64,
    pub complete: u64,
    pub failed: u64,
    pub lost: u64,
    /// Successful polls so far.
    pub polls: u64,
    /// Latest poll failure; stays until the next failure replaces it.
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub done: bool,
}

impl ProgressSnapshot {
    pub fn new(target: u64) -> Self {
        Self {
            running: 0,
            target,
            queued: 0,
            starting: 0,
            complete: 0,
            failed: 0,
            lost: 0,
            polls: 0,
            last_error: None,
            started_at: Utc::now(),
            done: false,
        }
    }

    /// Fraction of the target running, in `[0, 1]` once the target is met.
    pub fn ratio(&self) -> f64 {
        if self.target == 0 {
            return 1.0;
        }
        (self.running as f64 / self.target as f64).min(1.0)
    }

    /// Single status line for plain-text displays.
    pub fn render_line(&self) -> String {
        self.render_line_at(Utc::now())
    }

    pub fn render_line_at(&self, now: DateTime<Utc>) -> String {
        let elapsed = (now - self.started_at).num_seconds().max(0);
        let mut line = format!(
            "[{:02}:{:02}:{:02}] running {}/{} ({:.1}%) queued {} starting {} failed {} lost {}",
            elapsed / 3600,
            (elapsed / 60) % 60,
            elapsed % 60,
            self.running,
            self.target,
            self.ratio() * 100.0,
            self.queued,
            self.starting,
            self.failed,
            self.lost,
        );
        if self.done {
            line.push_str(" done");
        }
        if let Some(err) = &self.last_error {
            line.push_str(" error: ");
            line.push_str(err);
        }
        line
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_line())
    }
}

/// Read-only access to run progress for display front ends.
pub trait ProgressView: Send + Sync {
    fn snapshot(&self) -> ProgressSnapshot;
}

/// Lock-protected progress shared between the watcher and displays.
///
/// Every accessor holds the lock only long enough to copy or update the
/// snapshot, so readers never hold up a poll.
#[derive(Clone, Debug)]
pub struct ProgressHandle {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressHandle {
    pub fn new(target: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressSnapshot::new(target))),
        }
    }

    /// Reset for a new run, keeping the handle shared with existing readers.
    pub fn reset(&self, target: u64) {
        *self.inner.lock() = ProgressSnapshot::new(target);
    }

    /// Store the totals of a successful poll.
    pub fn record_poll(&self, totals: &GroupSummary) {
        let mut snapshot = self.inner.lock();
        snapshot.running = totals.running;
        snapshot.queued = totals.queued;
        snapshot.starting = totals.starting;
        snapshot.complete = totals.complete;
        snapshot.failed = totals.failed;
        snapshot.lost = totals.lost;
        snapshot.polls += 1;
    }

    pub fn record_error(&self, err: &anyhow::Error) {
        self.inner.lock().last_error = Some(format!("{err:#}"));
    }

    pub fn mark_done(&self) {
        self.inner.lock().done = true;
    }

    pub fn running(&self) -> u64 {
        self.inner.lock().running
    }
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ProgressView for ProgressHandle {
    fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn totals(running: u64) -> GroupSummary {
        GroupSummary {
            running,
            queued: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_overwrites_counts() {
        let progress = ProgressHandle::new(10);
        progress.record_poll(&totals(6));
        progress.record_poll(&totals(4));

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.running, 4);
        assert_eq!(snapshot.queued, 2);
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.target, 10);
    }

    #[test]
    fn test_error_is_sticky_and_last_wins() {
        let progress = ProgressHandle::new(1);
        progress.record_error(&anyhow::anyhow!("first"));
        progress.record_poll(&totals(0));
        assert_eq!(progress.snapshot().last_error.as_deref(), Some("first"));

        progress.record_error(&anyhow::anyhow!("root").context("second"));
        assert_eq!(
            progress.snapshot().last_error.as_deref(),
            Some("second: root")
        );
    }

    #[test]
    fn test_render_line() {
        let mut snapshot = ProgressSnapshot::new(8);
        snapshot.running = 2;
        let now = snapshot.started_at + Duration::seconds(3725);
        assert_eq!(
            snapshot.render_line_at(now),
            "[01:02:05] running 2/8 (25.0%) queued 0 starting 0 failed 0 lost 0"
        );

        snapshot.last_error = Some("timeout".into());
        snapshot.done = true;
        assert!(snapshot.render_line_at(now).ends_with(" done error: timeout"));
    }

    #[test]
    fn test_ratio_caps_at_one() {
        let mut snapshot = ProgressSnapshot::new(4);
        snapshot.running = 9;
        assert_eq!(snapshot.ratio(), 1.0);
        assert_eq!(ProgressSnapshot::new(0).ratio(), 1.0);
    }

    #[test]
    fn test_reset_keeps_shared_handle() {
        let progress = ProgressHandle::new(1);
        let reader = progress.clone();
        progress.record_poll(&totals(1));
        progress.mark_done();
        progress.reset(5);

        let snapshot = reader.snapshot();
        assert_eq!(snapshot.target, 5);
        assert_eq!(snapshot.polls, 0);
        assert!(!snapshot.done);
    }
}
