//! Task node of a plan.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Runtime task status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    Running,
    Finished,
    Failed,
}

/// One unit of work in a [`Plan`](super::Plan).
///
/// Proposals produced by generation use looser spellings; the serde aliases
/// accept `task_id`, `task_type`/`type` and `file_name`, and ids may be
/// written as numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task_id", deserialize_with = "id_repr")]
    pub id: String,
    #[serde(default, deserialize_with = "id_list_repr")]
    pub dependent_task_ids: Vec<String>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default, alias = "type")]
    pub task_type: String,
    #[serde(
        default,
        alias = "file_name",
        deserialize_with = "optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub result: String,
}

impl Task {
    pub fn new(id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_task_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_target_file(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn assigned_to(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }

    /// Back to `not_started` with generated output cleared.
    pub fn reset(&mut self) {
        self.status = TaskStatus::NotStarted;
        self.code.clear();
        self.result.clear();
    }
}

fn scalar_id<E: serde::de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(E::custom(format!(
            "task id must be a string or number, got {other}"
        ))),
    }
}

fn id_repr<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    scalar_id(Value::deserialize(d)?)
}

fn id_list_repr<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(scalar_id).collect(),
        other => Err(D::Error::custom(format!(
            "dependent_task_ids must be a list, got {other}"
        ))),
    }
}

fn optional_path<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}
