use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobInstance;

/// The orchestration platform under test, reduced to the calls the harness
/// makes.
///
/// Implementors must be shareable across the pools' worker tasks.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Register a job instance.
    async fn submit_job(&self, instance: &JobInstance) -> anyhow::Result<()>;

    /// Deregister a job by ID.
    async fn deregister_job(&self, job_id: &str) -> anyhow::Result<()>;

    /// List every job whose ID starts with `prefix`, with state summaries.
    async fn list_jobs(&self, prefix: &str) -> anyhow::Result<Vec<JobSummary>>;

    /// Fetch a job's allocations including their task event histories.
    async fn allocations(&self, job_id: &str) -> anyhow::Result<Vec<Allocation>>;
}

/// Per-task-group replica counts by state.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub queued: u64,
    pub starting: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
    pub lost: u64,
}

impl GroupSummary {
    fn accumulate(&mut self, other: &GroupSummary) {
        self.queued += other.queued;
        self.starting += other.starting;
        self.running += other.running;
        self.complete += other.complete;
        self.failed += other.failed;
        self.lost += other.lost;
    }
}

/// A listed job and its aggregate state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub submit_time: DateTime<Utc>,
    pub groups: BTreeMap<String, GroupSummary>,
}

impl JobSummary {
    /// Running replicas summed across every task group.
    pub fn running(&self) -> u64 {
        self.groups.values().map(|group| group.running).sum()
    }

    /// State counts summed across every task group.
    pub fn totals(&self) -> GroupSummary {
        let mut totals = GroupSummary::default();
        for group in self.groups.values() {
            totals.accumulate(group);
        }
        totals
    }
}

/// State counts summed across a set of jobs.
pub fn aggregate_totals<'a, I>(jobs: I) -> GroupSummary
where
    I: IntoIterator<Item = &'a JobSummary>,
{
    let mut totals = GroupSummary::default();
    for job in jobs {
        totals.accumulate(&job.totals());
    }
    totals
}

/// Lifecycle event reported by a task.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskEventKind {
    /// The client received the task.
    Received,
    /// The task started running.
    Started,
    /// Any other event type, kept for diagnostics.
    Other(String),
}

impl TaskEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Received" => Self::Received,
            "Started" => Self::Started,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub time: DateTime<Utc>,
}

/// A placement of one task group replica onto a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub job_id: String,
    pub create_time: DateTime<Utc>,
    /// Event history keyed by task name.
    pub task_events: BTreeMap<String, Vec<TaskEvent>>,
}

impl Allocation {
    /// Every task event in the allocation, across tasks.
    pub fn events(&self) -> impl Iterator<Item = &TaskEvent> {
        self.task_events.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(groups: &[(&str, u64)]) -> JobSummary {
        JobSummary {
            id: "job".into(),
            submit_time: Utc.timestamp_opt(0, 0).unwrap(),
            groups: groups
                .iter()
                .map(|(name, running)| {
                    (
                        name.to_string(),
                        GroupSummary {
                            running: *running,
                            queued: 1,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_running_sums_groups() {
        assert_eq!(summary(&[("a", 2), ("b", 3)]).running(), 5);
        assert_eq!(summary(&[]).running(), 0);
    }

    #[test]
    fn test_aggregate_totals() {
        let jobs = vec![summary(&[("a", 2)]), summary(&[("a", 1), ("b", 1)])];
        let totals = aggregate_totals(&jobs);
        assert_eq!(totals.running, 4);
        assert_eq!(totals.queued, 3);
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(TaskEventKind::parse("Received"), TaskEventKind::Received);
        assert_eq!(TaskEventKind::parse("Started"), TaskEventKind::Started);
        assert_eq!(
            TaskEventKind::parse("Killed"),
            TaskEventKind::Other("Killed".into())
        );
    }
}
