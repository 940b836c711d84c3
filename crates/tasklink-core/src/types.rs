use crate::error::TasklinkError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Remote task status, sent as `projectStatus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Map a local agent task status onto the remote vocabulary.
    /// `deleted` and unknown values have no remote status.
    pub fn from_local(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskStatus {
    type Err = TasklinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "todo" | "pending" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" | "doing" => Ok(TaskStatus::InProgress),
            "done" | "completed" => Ok(TaskStatus::Done),
            _ => Err(TasklinkError::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Complexity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Complexity {
    type Err = TasklinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            _ => Err(TasklinkError::InvalidValue {
                field: "complexity",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

/// A task as returned by the remote service. Status and complexity stay
/// strings so values this client doesn't know about still display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_status: Option<String>,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    pub project_status: TaskStatus,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial task update. Absent fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(deserialize_with = "de_id")]
    pub project_id: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub version: Option<u32>,
    /// Review page for this plan, when the service provides one.
    #[serde(default)]
    pub review_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub body: String,
}

// ---------------------------------------------------------------------------
// Id helpers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Str(String),
    Num(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Str(s) => s,
            RawId::Num(n) => n.to_string(),
        }
    }
}

/// Accept ids sent as either JSON strings or numbers.
fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_wire_shape() {
        let mut task = NewTask::new("Fix login bug");
        task.complexity = Some(Complexity::High);
        assert_eq!(
            serde_json::to_value(&task).unwrap(),
            json!({ "title": "Fix login bug", "complexity": "high", "projectStatus": "todo" })
        );
    }

    #[test]
    fn patch_omits_absent_fields() {
        let patch = TaskPatch {
            project_status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "projectStatus": "in_progress" })
        );
        assert!(TaskPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn local_status_mapping() {
        assert_eq!(TaskStatus::from_local("pending"), Some(TaskStatus::Todo));
        assert_eq!(
            TaskStatus::from_local("in_progress"),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(TaskStatus::from_local("completed"), Some(TaskStatus::Done));
        assert_eq!(TaskStatus::from_local("deleted"), None);
    }

    #[test]
    fn parse_status_and_complexity() {
        assert_eq!("done".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert_eq!(
            "In-Progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert!("later".parse::<TaskStatus>().is_err());
        assert_eq!("HIGH".parse::<Complexity>().unwrap(), Complexity::High);
        assert!("huge".parse::<Complexity>().is_err());
    }

    #[test]
    fn task_accepts_numeric_ids() {
        let task: Task = serde_json::from_value(json!({ "id": 42, "title": "t" })).unwrap();
        assert_eq!(task.id, "42");
        assert_eq!(task.project_status, None);
    }
}
