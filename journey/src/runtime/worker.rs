use serde::{Deserialize, Serialize};

/// What a pool does when one of its items fails.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log the failure and keep consuming the queue.
    Continue,
    /// Record the first failure and stop the pool.
    Abort,
}

/// Configuration for a fixed-size worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Name used in worker IDs and log fields.
    pub name: String,
    /// Number of workers spawned.
    pub workers: usize,
    /// Items buffered between `enqueue` and a free worker.
    pub queue_capacity: usize,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
}

impl PoolConfig {
    /// Create a pool configuration with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// ID of the `index`-th worker.
    pub fn worker_id(&self, index: usize) -> String {
        format!("{}-w{}", self.name, index)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            workers: 1,
            queue_capacity: 1,
            failure_policy: FailurePolicy::Continue,
        }
    }
}
