use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use journey::{
    Allocation, GroupSummary, JobInstance, JobSummary, JobTemplate, Platform,
};
use parking_lot::Mutex;

/// Platform capability, for failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Submit,
    Deregister,
    List,
    Allocations,
}

/// One scripted `list_jobs` answer.
#[derive(Clone, Debug)]
pub enum ListStep {
    /// Report this many running sub-units in total.
    Running(u64),
    /// Fail the call with this message.
    Fail(String),
}

#[derive(Default)]
struct FakeState {
    jobs: BTreeMap<String, JobSummary>,
    allocations: HashMap<String, Vec<Allocation>>,
    submissions: Vec<String>,
    deregistrations: Vec<String>,
    allocation_calls: Vec<String>,
    list_calls: usize,
    failures: HashSet<Capability>,
    job_failures: HashSet<(Capability, String)>,
    list_script: VecDeque<ListStep>,
    pending_submissions: bool,
    delay: Option<Duration>,
}

/// In-memory orchestration platform.
///
/// Submitted jobs are stored and listed under their IDs. By default a
/// submitted job immediately reports every replica of its task groups as
/// running; [`with_pending_submissions`](FakePlatform::with_pending_submissions)
/// reports them queued instead. Scripted list steps override what the
/// watcher sees, one step per `list_jobs` call.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
    allocations_in_flight: Arc<AtomicUsize>,
    max_allocations_in_flight: Arc<AtomicUsize>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submitted jobs report their replicas as queued, not running.
    pub fn with_pending_submissions(self) -> Self {
        self.state.lock().pending_submissions = true;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    pub fn insert_job(&self, summary: JobSummary) {
        self.state.lock().jobs.insert(summary.id.clone(), summary);
    }

    pub fn set_allocations(&self, job_id: &str, allocations: Vec<Allocation>) {
        self.state
            .lock()
            .allocations
            .insert(job_id.to_string(), allocations);
    }

    pub fn script_list(&self, steps: impl IntoIterator<Item = ListStep>) {
        self.state.lock().list_script.extend(steps);
    }

    /// Fail every call of a capability.
    pub fn fail(&self, capability: Capability) {
        self.state.lock().failures.insert(capability);
    }

    /// Fail a capability for one job ID only.
    pub fn fail_job(&self, capability: Capability, job_id: &str) {
        self.state
            .lock()
            .job_failures
            .insert((capability, job_id.to_string()));
    }

    /// IDs of submit calls, in call order, including failed ones.
    pub fn submissions(&self) -> Vec<String> {
        self.state.lock().submissions.clone()
    }

    pub fn deregistrations(&self) -> Vec<String> {
        self.state.lock().deregistrations.clone()
    }

    pub fn allocation_calls(&self) -> Vec<String> {
        self.state.lock().allocation_calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.state.lock().jobs.keys().cloned().collect()
    }

    /// Highest number of overlapping `allocations` calls seen so far.
    pub fn max_concurrent_allocation_calls(&self) -> usize {
        self.max_allocations_in_flight.load(Ordering::SeqCst)
    }

    pub fn assert_submission_count_eq(&self, expected: usize) {
        let actual = self.state.lock().submissions.len();
        assert_eq!(actual, expected, "Expected {expected} submissions, got {actual}");
    }

    async fn pause(&self) {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self, capability: Capability, job_id: Option<&str>) -> anyhow::Result<()> {
        let state = self.state.lock();
        if state.failures.contains(&capability) {
            anyhow::bail!("injected {capability:?} failure");
        }
        if let Some(job_id) = job_id {
            if state
                .job_failures
                .contains(&(capability, job_id.to_string()))
            {
                anyhow::bail!("injected {capability:?} failure for {job_id}");
            }
        }
        Ok(())
    }

    fn summary_for(instance: &JobInstance, pending: bool) -> JobSummary {
        let groups = JobTemplate::from_json(instance.body.clone())
            .map(|template| template.task_groups().to_vec())
            .unwrap_or_default()
            .into_iter()
            .map(|group| {
                let summary = if pending {
                    GroupSummary {
                        queued: group.count,
                        ..Default::default()
                    }
                } else {
                    GroupSummary {
                        running: group.count,
                        ..Default::default()
                    }
                };
                (group.name, summary)
            })
            .collect();
        JobSummary {
            id: instance.id.clone(),
            submit_time: Utc::now(),
            groups,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn submit_job(&self, instance: &JobInstance) -> anyhow::Result<()> {
        self.pause().await;
        let pending = {
            let mut state = self.state.lock();
            state.submissions.push(instance.id.clone());
            state.pending_submissions
        };
        self.check(Capability::Submit, Some(&instance.id))?;

        let summary = Self::summary_for(instance, pending);
        self.state.lock().jobs.insert(summary.id.clone(), summary);
        Ok(())
    }

    async fn deregister_job(&self, job_id: &str) -> anyhow::Result<()> {
        self.pause().await;
        self.state.lock().deregistrations.push(job_id.to_string());
        self.check(Capability::Deregister, Some(job_id))?;

        self.state.lock().jobs.remove(job_id);
        Ok(())
    }

    async fn list_jobs(&self, prefix: &str) -> anyhow::Result<Vec<JobSummary>> {
        self.pause().await;
        let step = {
            let mut state = self.state.lock();
            state.list_calls += 1;
            state.list_script.pop_front()
        };
        self.check(Capability::List, None)?;

        let mut jobs: Vec<JobSummary> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| job.id.starts_with(prefix))
            .cloned()
            .collect();

        match step {
            None => Ok(jobs),
            Some(ListStep::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(ListStep::Running(running)) => {
                // the whole scripted count is reported on one job
                if jobs.is_empty() {
                    jobs.push(JobSummary {
                        id: format!("{prefix}scripted"),
                        submit_time: Utc::now(),
                        groups: BTreeMap::new(),
                    });
                }
                for (i, job) in jobs.iter_mut().enumerate() {
                    job.groups.clear();
                    job.groups.insert(
                        "group".to_string(),
                        GroupSummary {
                            running: if i == 0 { running } else { 0 },
                            ..Default::default()
                        },
                    );
                }
                Ok(jobs)
            }
        }
    }

    async fn allocations(&self, job_id: &str) -> anyhow::Result<Vec<Allocation>> {
        let current = self.allocations_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.allocations_in_flight);
        self.max_allocations_in_flight
            .fetch_max(current, Ordering::SeqCst);

        self.pause().await;
        self.state.lock().allocation_calls.push(job_id.to_string());
        self.check(Capability::Allocations, Some(job_id))?;

        Ok(self
            .state
            .lock()
            .allocations
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }
}
