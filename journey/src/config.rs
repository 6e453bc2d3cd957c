use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Default name prefix applied to every job a run creates.
pub const DEFAULT_JOB_PREFIX: &str = "c1b-";
/// Default number of concurrent submitters and deregisterers.
pub const DEFAULT_WORKERS: usize = 20;
/// Default number of concurrent allocation queries during collection.
pub const DEFAULT_COLLECTOR_CONCURRENCY: usize = 20;
/// Default interval between progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default address of the orchestration platform's HTTP API.
pub const DEFAULT_NOMAD_ADDR: &str = "http://127.0.0.1:4646";

/// Environment keys understood by [`HarnessConfig::from_lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessEnv {
    /// Number of job instances to submit (numeric, required for runs).
    Jobs,
    /// Path to the JSON job template (required for runs).
    JobSpec,
    /// Worker count for submission and teardown pools.
    Workers,
    /// Job name prefix.
    Prefix,
    /// Platform HTTP address.
    NomadAddr,
}

impl HarnessEnv {
    /// Returns the environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jobs => "JOBS",
            Self::JobSpec => "JOBSPEC",
            Self::Workers => "WORKERS",
            Self::Prefix => "PREFIX",
            Self::NomadAddr => "NOMAD_ADDR",
        }
    }
}

/// Run configuration passed explicitly into every component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Prefix prepended to derived job IDs and used to list a run's jobs.
    pub job_prefix: String,
    /// Number of job instances derived from the template.
    pub job_count: u64,
    /// Location of the job template.
    pub job_spec: Option<PathBuf>,
    /// Workers in the submission pool.
    pub dispatch_workers: usize,
    /// Workers in the deregistration pool.
    pub teardown_workers: usize,
    /// Concurrent allocation queries issued by the metrics collector.
    pub collector_concurrency: usize,
    /// Interval between progress polls.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Capacity of each pool's hand-off queue.
    pub queue_capacity: usize,
    /// Directory receiving the metrics dump.
    pub output_dir: PathBuf,
    /// Platform HTTP address.
    pub nomad_addr: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            job_prefix: DEFAULT_JOB_PREFIX.to_string(),
            job_count: 0,
            job_spec: None,
            dispatch_workers: DEFAULT_WORKERS,
            teardown_workers: DEFAULT_WORKERS,
            collector_concurrency: DEFAULT_COLLECTOR_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: 1,
            output_dir: PathBuf::from("."),
            nomad_addr: DEFAULT_NOMAD_ADDR.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `JOBS` must parse as an unsigned integer when present. An unparsable
    /// `WORKERS` keeps the default, and an empty `PREFIX` keeps the default
    /// prefix.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(HarnessEnv::Jobs.as_str()) {
            config.job_count = raw.trim().parse().with_context(|| {
                format!("{} must be numeric, got {raw:?}", HarnessEnv::Jobs.as_str())
            })?;
        }

        if let Some(path) = lookup(HarnessEnv::JobSpec.as_str()) {
            if !path.trim().is_empty() {
                config.job_spec = Some(PathBuf::from(path));
            }
        }

        if let Some(workers) = lookup(HarnessEnv::Workers.as_str())
            .and_then(|raw| raw.trim().parse::<usize>().ok())
        {
            config.dispatch_workers = workers;
            config.teardown_workers = workers;
        }

        if let Some(prefix) = lookup(HarnessEnv::Prefix.as_str()) {
            if !prefix.is_empty() {
                config.job_prefix = prefix;
            }
        }

        if let Some(addr) = lookup(HarnessEnv::NomadAddr.as_str()) {
            if !addr.trim().is_empty() {
                config.nomad_addr = addr.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Set the job prefix.
    pub fn with_job_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_prefix = prefix.into();
        self
    }

    /// Set the number of job instances.
    pub fn with_job_count(mut self, count: u64) -> Self {
        self.job_count = count;
        self
    }

    /// Set the job template location.
    pub fn with_job_spec(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_spec = Some(path.into());
        self
    }

    /// Set both pool worker counts.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers;
        self.teardown_workers = workers;
        self
    }

    /// Set the collector's concurrency limit.
    pub fn with_collector_concurrency(mut self, concurrency: usize) -> Self {
        self.collector_concurrency = concurrency;
        self
    }

    /// Set the progress poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Checks the settings every component relies on.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_prefix.is_empty() {
            bail!("job prefix must not be empty");
        }
        if self.dispatch_workers == 0 || self.teardown_workers == 0 {
            bail!("worker counts must be greater than zero");
        }
        if self.collector_concurrency == 0 {
            bail!("collector concurrency must be greater than zero");
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be greater than zero");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        Ok(())
    }

    /// Checks the additional settings a start or metrics run needs.
    pub fn validate_for_run(&self) -> anyhow::Result<()> {
        self.validate()?;
        if self.job_count == 0 {
            bail!("{} must be greater than zero", HarnessEnv::Jobs.as_str());
        }
        if self.job_spec.is_none() {
            bail!("{} must be provided", HarnessEnv::JobSpec.as_str());
        }
        Ok(())
    }

    /// Location of the job template, failing when it was never configured.
    pub fn job_spec_path(&self) -> anyhow::Result<&PathBuf> {
        self.job_spec
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("{} must be provided", HarnessEnv::JobSpec.as_str()))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
