//! Prometheus metrics for the harness itself.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `journey_submissions_total` - Job registrations by status
//! - `journey_deregistrations_total` - Job deregistrations by status
//! - `journey_allocation_fetches_total` - Allocation queries by status
//! - `journey_allocations_seen_total` - Allocations returned by the platform
//!
//! ## Gauges
//! - `journey_running_sub_units` - Running count from the latest poll
//! - `journey_target_sub_units` - Run target
//!
//! ## Histograms
//! - `journey_platform_call_seconds` - External call latency by operation
#![cfg(feature = "metrics")]

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use prometheus::{
    exponential_buckets, CounterVec, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts,
    Registry,
};

/// File name of the text exposition written next to the raw dump.
pub const METRICS_FILE: &str = "metrics.prom";

/// Global Prometheus registry for journey metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `status` (success, error).
pub static SUBMISSIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("journey_submissions_total", "Job registrations issued");
    CounterVec::new(opts, &["status"])
        .expect("journey_submissions_total metric creation failed")
});

/// Labels: `status` (success, error).
pub static DEREGISTRATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("journey_deregistrations_total", "Job deregistrations issued");
    CounterVec::new(opts, &["status"])
        .expect("journey_deregistrations_total metric creation failed")
});

/// Labels: `status` (success, error).
pub static ALLOCATION_FETCHES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("journey_allocation_fetches_total", "Allocation queries issued");
    CounterVec::new(opts, &["status"])
        .expect("journey_allocation_fetches_total metric creation failed")
});

pub static ALLOCATIONS_SEEN_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("journey_allocations_seen_total", "Allocations returned by the platform")
        .expect("journey_allocations_seen_total metric creation failed")
});

pub static RUNNING_SUB_UNITS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("journey_running_sub_units", "Running sub-units at the latest poll")
        .expect("journey_running_sub_units metric creation failed")
});

pub static TARGET_SUB_UNITS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("journey_target_sub_units", "Sub-units the run expects to see running")
        .expect("journey_target_sub_units metric creation failed")
});

/// Labels: `operation` (submit_job, deregister_job, list_jobs, allocations).
pub static PLATFORM_CALL_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "journey_platform_call_seconds",
        "Platform call latency in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["operation"])
        .expect("journey_platform_call_seconds metric creation failed")
});

/// Register all collectors with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(SUBMISSIONS_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(DEREGISTRATIONS_TOTAL.clone()),
        Box::new(ALLOCATION_FETCHES_TOTAL.clone()),
        Box::new(ALLOCATIONS_SEEN_TOTAL.clone()),
        Box::new(RUNNING_SUB_UNITS.clone()),
        Box::new(TARGET_SUB_UNITS.clone()),
        Box::new(PLATFORM_CALL_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_submission(status: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_deregistration(status: &str) {
    DEREGISTRATIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_allocation_fetch(status: &str, allocations: usize) {
    ALLOCATION_FETCHES_TOTAL.with_label_values(&[status]).inc();
    ALLOCATIONS_SEEN_TOTAL.inc_by(allocations as u64);
}

pub fn set_progress(running: f64, target: f64) {
    RUNNING_SUB_UNITS.set(running);
    TARGET_SUB_UNITS.set(target);
}

pub fn observe_call_latency(operation: &str, duration_secs: f64) {
    PLATFORM_CALL_SECONDS
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families).map_err(Into::into)
}

/// Write [`gather_metrics`] output to [`METRICS_FILE`] under `dir`.
pub fn write_metrics_text(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(METRICS_FILE);
    let text = gather_metrics()?;
    std::fs::write(&path, text).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init_metrics().expect("first init");
        init_metrics().expect("second init");
    }

    #[test]
    fn test_gather_includes_recorded_series() {
        init_metrics().expect("metrics initialization should succeed");

        record_submission("success");
        record_deregistration("error");
        record_allocation_fetch("success", 2);
        set_progress(3.0, 10.0);
        observe_call_latency("list_jobs", 0.05);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("journey_submissions_total"));
        assert!(output.contains("journey_allocations_seen_total"));
        assert!(output.contains("journey_platform_call_seconds"));
    }

    #[test]
    fn test_write_metrics_text_lands_in_dir() {
        init_metrics().expect("metrics initialization should succeed");
        record_submission("success");

        let dir = tempfile::tempdir().unwrap();
        let path = write_metrics_text(dir.path()).expect("write should succeed");

        assert_eq!(path, dir.path().join(METRICS_FILE));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("journey_submissions_total"));
    }
}
