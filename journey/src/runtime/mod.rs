/// Harness builder with explicit dependencies.
pub mod builder;
/// Bounded fan-out of allocation queries into lifecycle series.
pub mod collector;
/// Fixed-size worker pools for submission and teardown.
pub mod pool;
/// Hierarchical cancellation tokens.
pub mod shutdown;
/// Harness sequencing runs, teardown and collection.
pub mod supervisor;
/// Progress polling loop.
pub mod watcher;
/// Worker pool configuration.
pub mod worker;

pub use builder::HarnessBuilder;
pub use collector::{LifecycleSeries, MetricsCollector};
pub use pool::{
    start_dispatch_pool, start_teardown_pool, DeregisterDispatcher, DispatchPool, Dispatcher,
    PoolReport, PoolSender, SubmitDispatcher, TeardownPool, WorkerPool,
};
pub use shutdown::ShutdownToken;
pub use supervisor::{Harness, RunSummary, StopSummary};
pub use watcher::{ProgressWatcher, WatchOutcome, MIN_POLL_INTERVAL};
pub use worker::{FailurePolicy, PoolConfig};
