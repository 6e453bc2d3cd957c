//! Journey - load harness for job orchestration platforms.
//!
//! Journey submits many copies of one job template to an orchestrator,
//! watches until every replica is running, and then reconstructs how the
//! population moved through its lifecycle over time.
//!
//! # Core Concepts
//!
//! - **Template and instances**: a [`JobTemplate`] is replicated into
//!   uniquely named [`JobInstance`]s by [`derive_instance`]. The expected
//!   number of running replicas is the [`RunTarget`].
//!
//! - **Platform**: the [`Platform`] trait is everything the harness needs
//!   from the orchestrator. [`NomadClient`] implements it over HTTP.
//!
//! - **Pools**: [`WorkerPool`] runs a fixed number of workers over a bounded
//!   queue. Submission keeps going past failures; teardown stops at the
//!   first one.
//!
//! - **Watcher**: [`ProgressWatcher`] polls job summaries into a shared
//!   [`ProgressHandle`] until the target is running.
//!
//! - **Collector**: [`MetricsCollector`] fetches every job's allocations
//!   with bounded concurrency and folds the events into four
//!   [`Timeseries`], which [`MetricsReport`] buckets for charting.
//!
//! - **Harness**: [`Harness`] sequences all of the above and is built with
//!   [`HarnessBuilder`].
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use journey::*;
//!
//! let config = HarnessConfig::from_env()?;
//! let template = JobTemplate::load(config.job_spec_path()?)?;
//! let harness = HarnessBuilder::new(config)
//!     .with_platform(Arc::new(NomadClient::new(DEFAULT_NOMAD_ADDR)?))
//!     .build()?;
//!
//! let run = harness.start(&template).await?;
//! let report = harness.collect_metrics(&template, run.start_time).await?;
//! report.write_json(&harness.config().output_dir)?;
//! ```

/// Harness configuration and its environment keys.
///
/// The `config` module defines [`HarnessConfig`] and the defaults every
/// component falls back to.
pub mod config;

/// Job templates and the instances derived from them.
///
/// The `job` module provides:
/// - [`JobTemplate`] - a parsed job definition kept verbatim for submission
/// - [`JobInstance`] - one uniquely named copy
/// - [`derive_instance`] - pure instance constructor
/// - [`RunTarget`] - expected running sub-units of a run
pub mod job;

/// Orchestrator abstraction.
///
/// The `platform` module defines the [`Platform`] trait along with the job
/// summary and allocation types it returns.
pub mod platform;

/// HTTP client for the Nomad API.
pub mod nomad;

/// Append-only timeseries with windowed aggregation.
///
/// The `timeseries` module provides [`Timeseries`] and the [`sum`] and
/// [`count`] aggregators.
pub mod timeseries;

/// Run progress shared with display front ends.
///
/// The `progress` module provides [`ProgressSnapshot`], the read-only
/// [`ProgressView`] trait and its lock-protected [`ProgressHandle`].
pub mod progress;

/// Bucketed run metrics and chart series.
pub mod report;

/// Runtime pools, watcher, collector and the harness.
///
/// The `runtime` module provides:
/// - [`Harness`] - sequences runs, teardown and collection
/// - [`HarnessBuilder`] - builder with explicit dependencies
/// - [`WorkerPool`] - fixed-size pool over a bounded queue
/// - [`ProgressWatcher`] - polls until the run target is running
/// - [`MetricsCollector`] - bounded allocation fan-out
/// - [`ShutdownToken`] - cancellation signaling
pub mod runtime;

/// Tracing spans and telemetry hooks.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics for the harness.
pub mod metrics;

pub use config::*;
pub use job::*;
pub use nomad::NomadClient;
pub use platform::*;
pub use progress::*;
pub use report::*;
pub use runtime::*;
pub use timeseries::{count, sum, Aggregator, Timeseries, MIN_STRIDE};
