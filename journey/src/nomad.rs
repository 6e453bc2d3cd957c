//! HTTP implementation of [`Platform`] against the Nomad job API.
//!
//! Only the endpoints the harness needs are wrapped. Timestamps arrive as
//! Unix nanoseconds and are converted on decode.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::job::JobInstance;
use crate::platform::{Allocation, GroupSummary, JobSummary, Platform, TaskEvent, TaskEventKind};

/// Nomad API client.
#[derive(Clone, Debug)]
pub struct NomadClient {
    http: Client,
    base: Url,
}

impl NomadClient {
    /// Create a client for the API at `addr` (for example `http://127.0.0.1:4646`).
    pub fn new(addr: &str) -> anyhow::Result<Self> {
        let base = Url::parse(addr).with_context(|| format!("invalid platform address {addr:?}"))?;
        if base.cannot_be_a_base() {
            bail!("platform address {addr:?} cannot be used as a base URL");
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("platform address cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> anyhow::Result<T> {
        let response = check_status(response, what).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed decoding {what} response"))
    }
}

async fn check_status(response: Response, what: &str) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{what} failed with status {status}: {}", body.trim())
}

#[async_trait]
impl Platform for NomadClient {
    async fn submit_job(&self, instance: &JobInstance) -> anyhow::Result<()> {
        let url = self.endpoint(&["v1", "jobs"])?;
        let response = self
            .http
            .put(url)
            .json(&instance.register_payload())
            .send()
            .await
            .with_context(|| format!("failed sending register request for {}", instance.id))?;
        check_status(response, "job register").await?;
        Ok(())
    }

    async fn deregister_job(&self, job_id: &str) -> anyhow::Result<()> {
        let url = self.endpoint(&["v1", "job", job_id])?;
        let response = self
            .http
            .delete(url)
            .query(&[("purge", "false")])
            .send()
            .await
            .with_context(|| format!("failed sending deregister request for {job_id}"))?;
        check_status(response, "job deregister").await?;
        Ok(())
    }

    async fn list_jobs(&self, prefix: &str) -> anyhow::Result<Vec<JobSummary>> {
        let url = self.endpoint(&["v1", "jobs"])?;
        let response = self
            .http
            .get(url)
            .query(&[("prefix", prefix)])
            .send()
            .await
            .context("failed sending job list request")?;
        let stubs: Vec<WireJobStub> = Self::decode(response, "job list").await?;
        Ok(stubs.into_iter().map(JobSummary::from).collect())
    }

    async fn allocations(&self, job_id: &str) -> anyhow::Result<Vec<Allocation>> {
        let url = self.endpoint(&["v1", "job", job_id, "allocations"])?;
        let response = self
            .http
            .get(url)
            .query(&[("all", "true")])
            .send()
            .await
            .with_context(|| format!("failed sending allocation request for {job_id}"))?;
        let stubs: Vec<WireAllocationStub> = Self::decode(response, "allocation list").await?;
        Ok(stubs.into_iter().map(Allocation::from).collect())
    }
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireJobStub {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    submit_time: i64,
    #[serde(default)]
    job_summary: Option<WireJobSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireJobSummary {
    #[serde(default)]
    summary: BTreeMap<String, WireGroupSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireGroupSummary {
    queued: u64,
    complete: u64,
    failed: u64,
    running: u64,
    starting: u64,
    lost: u64,
}

impl From<WireJobStub> for JobSummary {
    fn from(stub: WireJobStub) -> Self {
        let groups = stub
            .job_summary
            .unwrap_or_default()
            .summary
            .into_iter()
            .map(|(name, group)| {
                (
                    name,
                    GroupSummary {
                        queued: group.queued,
                        starting: group.starting,
                        running: group.running,
                        complete: group.complete,
                        failed: group.failed,
                        lost: group.lost,
                    },
                )
            })
            .collect();
        JobSummary {
            id: stub.id,
            submit_time: from_nanos(stub.submit_time),
            groups,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAllocationStub {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "JobID", default)]
    job_id: String,
    #[serde(default)]
    create_time: i64,
    #[serde(default)]
    task_states: Option<BTreeMap<String, WireTaskState>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTaskState {
    #[serde(default)]
    events: Option<Vec<WireTaskEvent>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTaskEvent {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    time: i64,
}

impl From<WireAllocationStub> for Allocation {
    fn from(stub: WireAllocationStub) -> Self {
        let task_events = stub
            .task_states
            .unwrap_or_default()
            .into_iter()
            .map(|(task, state)| {
                let events = state
                    .events
                    .unwrap_or_default()
                    .into_iter()
                    .map(|event| TaskEvent {
                        kind: TaskEventKind::parse(&event.kind),
                        time: from_nanos(event.time),
                    })
                    .collect();
                (task, events)
            })
            .collect();
        Allocation {
            id: stub.id,
            job_id: stub.job_id,
            create_time: from_nanos(stub.create_time),
            task_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_joins_segments() {
        let client = NomadClient::new("http://127.0.0.1:4646/").unwrap();
        let url = client.endpoint(&["v1", "job", "c1b-web-1", "allocations"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:4646/v1/job/c1b-web-1/allocations");

        let url = client.endpoint(&["v1", "job", "odd/id"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:4646/v1/job/odd%2Fid");
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(NomadClient::new("not a url").is_err());
    }

    #[test]
    fn test_job_stub_decodes_summary() {
        let stub: WireJobStub = serde_json::from_value(json!({
            "ID": "c1b-web-0",
            "Name": "c1b-web-0",
            "SubmitTime": 1_600_000_000_123_000_000i64,
            "JobSummary": {
                "Summary": {
                    "web": { "Queued": 1, "Running": 4, "Starting": 2 },
                    "db": { "Running": 1 }
                }
            }
        }))
        .unwrap();
        let summary = JobSummary::from(stub);

        assert_eq!(summary.id, "c1b-web-0");
        assert_eq!(summary.running(), 5);
        assert_eq!(summary.submit_time.timestamp_millis(), 1_600_000_000_123);
    }

    #[test]
    fn test_allocation_stub_decodes_events() {
        let stub: WireAllocationStub = serde_json::from_value(json!({
            "ID": "alloc-1",
            "JobID": "c1b-web-0",
            "CreateTime": 2_000_000_000i64,
            "TaskStates": {
                "server": {
                    "State": "running",
                    "Events": [
                        { "Type": "Received", "Time": 3_000_000_000i64 },
                        { "Type": "Task Setup", "Time": 3_500_000_000i64 },
                        { "Type": "Started", "Time": 4_000_000_000i64 }
                    ]
                },
                "sidecar": { "Events": null }
            }
        }))
        .unwrap();
        let alloc = Allocation::from(stub);

        assert_eq!(alloc.create_time.timestamp(), 2);
        let kinds: Vec<_> = alloc.events().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TaskEventKind::Received,
                TaskEventKind::Other("Task Setup".into()),
                TaskEventKind::Started
            ]
        );
    }

    #[test]
    fn test_allocation_without_task_states() {
        let stub: WireAllocationStub =
            serde_json::from_value(json!({ "ID": "a", "CreateTime": 0 })).unwrap();
        let alloc = Allocation::from(stub);
        assert_eq!(alloc.events().count(), 0);
    }
}
