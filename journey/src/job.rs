use std::fmt::{self, Display};
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task group within a job template and the replica count it asks for.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: String,
    pub count: u64,
}

/// Immutable description of the work a run replicates.
///
/// The platform's JSON job body is kept verbatim so instances can be
/// submitted without a round trip through a typed model. Only the fields the
/// harness needs (identity and group counts) are extracted.
#[derive(Clone, Debug, PartialEq)]
pub struct JobTemplate {
    id: String,
    task_groups: Vec<TaskGroup>,
    body: Value,
}

impl JobTemplate {
    /// Build a template from the platform's JSON job form.
    ///
    /// Accepts either a bare job object or one wrapped as `{"Job": {...}}`.
    /// A task group without `Count` counts as one replica.
    pub fn from_json(value: Value) -> anyhow::Result<Self> {
        let body = match value {
            Value::Object(mut map) if map.contains_key("Job") => map
                .remove("Job")
                .ok_or_else(|| anyhow!("job wrapper is empty"))?,
            other => other,
        };

        let id = body
            .get("ID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("job template has no ID"))?
            .to_string();

        let mut task_groups = Vec::new();
        if let Some(groups) = body.get("TaskGroups") {
            let groups = groups
                .as_array()
                .ok_or_else(|| anyhow!("TaskGroups must be an array"))?;
            for (idx, group) in groups.iter().enumerate() {
                let name = group
                    .get("Name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("group-{idx}"));
                let count = match group.get("Count") {
                    None | Some(Value::Null) => 1,
                    Some(count) => count
                        .as_u64()
                        .ok_or_else(|| anyhow!("task group {name:?} has a non-numeric Count"))?,
                };
                task_groups.push(TaskGroup { name, count });
            }
        }

        Ok(Self {
            id,
            task_groups,
            body,
        })
    }

    /// Parse a template from JSON text.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw).context("job template is not valid JSON")?;
        Self::from_json(value)
    }

    /// Read and parse a template file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading job template {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("failed parsing job template {}", path.display()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_groups(&self) -> &[TaskGroup] {
        &self.task_groups
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Schedulable sub-units one instance of this template asks for.
    pub fn sub_unit_count(&self) -> u64 {
        self.task_groups.iter().map(|group| group.count).sum()
    }
}

/// One uniquely named copy of a template, ready for submission.
#[derive(Clone, Debug, PartialEq)]
pub struct JobInstance {
    pub id: String,
    pub sequence: u64,
    pub body: Value,
}

impl JobInstance {
    /// Request body for the platform's register endpoint.
    pub fn register_payload(&self) -> Value {
        serde_json::json!({ "Job": self.body })
    }
}

impl Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Derive the `sequence`-th instance of a template.
///
/// The instance ID is `<prefix><template-id>-<sequence>` and replaces both
/// `ID` and `Name` in a fresh copy of the body.
pub fn derive_instance(template: &JobTemplate, prefix: &str, sequence: u64) -> JobInstance {
    let id = instance_id(prefix, template.id(), sequence);
    let mut body = template.body().clone();
    if let Value::Object(map) = &mut body {
        map.insert("ID".to_string(), Value::String(id.clone()));
        map.insert("Name".to_string(), Value::String(id.clone()));
    }
    JobInstance { id, sequence, body }
}

/// Name of the `sequence`-th instance of `template_id`.
pub fn instance_id(prefix: &str, template_id: &str, sequence: u64) -> String {
    format!("{prefix}{template_id}-{sequence}")
}

/// Total sub-units a run expects to see running.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RunTarget(u64);

impl RunTarget {
    pub fn new(template: &JobTemplate, replicas: u64) -> Self {
        Self(template.sub_unit_count().saturating_mul(replicas))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for RunTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RunTarget {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Reject templates that could never produce a measurable run.
pub fn ensure_schedulable(template: &JobTemplate) -> anyhow::Result<()> {
    if template.task_groups().is_empty() {
        bail!("job template {:?} has no task groups", template.id());
    }
    Ok(())
}
