//! Tracing and telemetry instrumentation for journey.
//!
//! Span constructors for the harness's external calls, plus `record_*`
//! helpers that log an event and, with the `metrics` feature, update the
//! Prometheus collectors in [`crate::metrics`].

use std::future::Future;
use std::time::Instant;

use tracing::{info_span, Instrument, Span};

/// Span around one pool item, whatever the pool does with it.
#[must_use]
pub fn pool_item_span(
    pool: impl AsRef<str>,
    worker_id: impl AsRef<str>,
    item: impl AsRef<str>,
) -> Span {
    info_span!(
        "journey.pool_item",
        pool = %pool.as_ref(),
        worker_id = %worker_id.as_ref(),
        item = %item.as_ref(),
    )
}

/// Span around a job registration call.
#[must_use]
pub fn submit_span(job_id: impl AsRef<str>) -> Span {
    info_span!("journey.submit", job_id = %job_id.as_ref())
}

/// Span around a job deregistration call.
#[must_use]
pub fn deregister_span(job_id: impl AsRef<str>) -> Span {
    info_span!("journey.deregister", job_id = %job_id.as_ref())
}

/// Span around one allocation fetch during collection.
#[must_use]
pub fn fetch_span(job_id: impl AsRef<str>) -> Span {
    info_span!("journey.fetch_allocations", job_id = %job_id.as_ref())
}

/// Span around one progress poll.
#[must_use]
pub fn poll_span(prefix: impl AsRef<str>) -> Span {
    info_span!("journey.poll", prefix = %prefix.as_ref())
}

/// Span around a whole metrics collection.
#[must_use]
pub fn collect_span(prefix: impl AsRef<str>, expected_jobs: u64) -> Span {
    info_span!(
        "journey.collect",
        prefix = %prefix.as_ref(),
        expected_jobs = expected_jobs,
    )
}

/// Run `future` inside `span` and record how long the external call took.
pub async fn timed_call<F, T>(operation: &'static str, span: Span, future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let result = future.instrument(span).await;
    observe_call_latency(operation, started.elapsed().as_secs_f64());
    result
}

/// Outcome label of an external call.
pub fn status_label<T>(result: &anyhow::Result<T>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}

/// Record a job submission outcome.
pub fn record_submission(job_id: impl AsRef<str>, status: &str) {
    tracing::debug!(job_id = %job_id.as_ref(), status = status, "job submitted");

    #[cfg(feature = "metrics")]
    crate::metrics::record_submission(status);
}

/// Record a job deregistration outcome.
pub fn record_deregistration(job_id: impl AsRef<str>, status: &str) {
    tracing::debug!(job_id = %job_id.as_ref(), status = status, "job deregistered");

    #[cfg(feature = "metrics")]
    crate::metrics::record_deregistration(status);
}

/// Record an allocation fetch outcome.
pub fn record_allocation_fetch(job_id: impl AsRef<str>, status: &str, allocations: usize) {
    tracing::debug!(
        job_id = %job_id.as_ref(),
        status = status,
        allocations = allocations,
        "allocations fetched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_allocation_fetch(status, allocations);
}

/// Record a successful progress poll.
pub fn record_poll(running: u64, target: u64) {
    tracing::debug!(running = running, target = target, "progress polled");

    #[cfg(feature = "metrics")]
    crate::metrics::set_progress(running as f64, target as f64);
}

/// Observe the latency of an external call.
pub fn observe_call_latency(operation: &'static str, duration_secs: f64) {
    tracing::trace!(operation = operation, duration_secs = duration_secs, "platform call finished");

    #[cfg(feature = "metrics")]
    crate::metrics::observe_call_latency(operation, duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names() {
        let cases = [
            (submit_span("job-1"), "journey.submit"),
            (deregister_span("job-1"), "journey.deregister"),
            (fetch_span("job-1"), "journey.fetch_allocations"),
            (poll_span("c1b-"), "journey.poll"),
            (collect_span("c1b-", 3), "journey.collect"),
            (pool_item_span("dispatch", "dispatch-w0", "job-1"), "journey.pool_item"),
        ];
        for (span, name) in cases {
            if let Some(metadata) = span.metadata() {
                assert_eq!(metadata.name(), name);
            }
        }
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(&Ok::<_, anyhow::Error>(())), "success");
        assert_eq!(status_label::<()>(&Err(anyhow::anyhow!("boom"))), "error");
    }

    #[tokio::test]
    async fn test_timed_call_passes_result_through() {
        let value = timed_call("list_jobs", poll_span("p"), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = timed_call::<_, ()>("list_jobs", poll_span("p"), async {
            Err(anyhow::anyhow!("down"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "down");
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_submission("job-1", "success");
        record_deregistration("job-1", "error");
        record_allocation_fetch("job-1", "success", 3);
        record_poll(4, 10);
        observe_call_latency("submit_job", 0.25);
    }
}
