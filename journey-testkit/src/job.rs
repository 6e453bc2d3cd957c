use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use journey::{Allocation, GroupSummary, JobSummary, JobTemplate, TaskEvent, TaskEventKind};
use serde_json::json;

/// Fixed instant used as a run start in tests.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// `base_time()` shifted by `offset_ms`.
pub fn at(offset_ms: i64) -> DateTime<Utc> {
    base_time() + Duration::milliseconds(offset_ms)
}

/// Template `sleep` with groups `web` (2 replicas) and `worker` (1 replica).
pub fn sample_template() -> JobTemplate {
    template_with_groups("sleep", &[("web", 2), ("worker", 1)])
}

pub fn template_with_groups(id: &str, groups: &[(&str, u64)]) -> JobTemplate {
    let task_groups: Vec<_> = groups
        .iter()
        .map(|(name, count)| {
            json!({
                "Name": name,
                "Count": count,
                "Tasks": [{ "Name": "main", "Driver": "raw_exec" }],
            })
        })
        .collect();
    JobTemplate::from_json(json!({
        "ID": id,
        "Name": id,
        "Type": "service",
        "Datacenters": ["dc1"],
        "TaskGroups": task_groups,
    }))
    .expect("fixture template is valid")
}

/// Summary of a job with a single group reporting `running` replicas.
pub fn job_summary(id: &str, submit_time: DateTime<Utc>, running: u64) -> JobSummary {
    let mut groups = BTreeMap::new();
    groups.insert(
        "group".to_string(),
        GroupSummary {
            running,
            ..Default::default()
        },
    );
    JobSummary {
        id: id.to_string(),
        submit_time,
        groups,
    }
}

/// Allocation of `job_id` with one task `main` carrying `events`.
pub fn allocation(
    job_id: &str,
    index: usize,
    create_time: DateTime<Utc>,
    events: &[(TaskEventKind, DateTime<Utc>)],
) -> Allocation {
    let mut task_events = BTreeMap::new();
    task_events.insert(
        "main".to_string(),
        events
            .iter()
            .map(|(kind, time)| TaskEvent {
                kind: kind.clone(),
                time: *time,
            })
            .collect(),
    );
    Allocation {
        id: format!("{job_id}-alloc-{index}"),
        job_id: job_id.to_string(),
        create_time,
        task_events,
    }
}

/// Allocation that was placed, received, and started at the given offsets.
pub fn started_allocation(
    job_id: &str,
    index: usize,
    placed_ms: i64,
    received_ms: i64,
    started_ms: i64,
) -> Allocation {
    allocation(
        job_id,
        index,
        at(placed_ms),
        &[
            (TaskEventKind::Received, at(received_ms)),
            (TaskEventKind::parse("Task Setup"), at(received_ms)),
            (TaskEventKind::Started, at(started_ms)),
        ],
    )
}
