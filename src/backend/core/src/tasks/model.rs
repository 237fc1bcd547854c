//! Task records and the field sets callers may supply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PopugError, Result};
use crate::events::TaskPayload;
use crate::projection::AssigneeId;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status. Moves only from `Assigned` to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Assigned,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Assigned => "Assigned",
            TaskStatus::Completed => "Completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = PopugError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Assigned" => Ok(TaskStatus::Assigned),
            "Completed" => Ok(TaskStatus::Completed),
            other => Err(PopugError::invalid_task_input(
                "status",
                &format!("unknown status '{}'", other),
            )),
        }
    }
}

/// A stored task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub jira_id: String,
    pub status: TaskStatus,
    pub assignee_id: AssigneeId,
    /// Assigned by the store on insert
    pub created: DateTime<Utc>,
}

impl Task {
    /// Event payload for this task's current state.
    pub fn to_payload(&self) -> TaskPayload {
        TaskPayload {
            id: self.id.0,
            title: self.title.clone(),
            jira_id: self.jira_id.clone(),
            assignee_id: self.assignee_id.0,
        }
    }
}

/// Fields for a new task. The assignee and status are always chosen by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub jira_id: String,
}

impl NewTask {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            jira_id: String::new(),
        }
    }

    pub fn with_jira_id(mut self, jira_id: impl Into<String>) -> Self {
        self.jira_id = jira_id.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(PopugError::invalid_task_input("title", "must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(PopugError::invalid_task_input("description", "must not be empty"));
        }
        Ok(())
    }
}

/// Caller-supplied changes to a task.
///
/// There is no assignee field: assignment is only ever changed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub jira_id: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// An update that only completes the task.
    pub fn complete() -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        }
    }

    /// Merge into `task`, enforcing the status transition rule.
    pub(crate) fn apply(&self, task: &Task) -> Result<Task> {
        let mut next = task.clone();

        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(PopugError::invalid_task_input("title", "must not be empty"));
            }
            next.title = title.clone();
        }
        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                return Err(PopugError::invalid_task_input("description", "must not be empty"));
            }
            next.description = description.clone();
        }
        if let Some(jira_id) = &self.jira_id {
            next.jira_id = jira_id.clone();
        }
        if let Some(status) = self.status {
            if task.status.is_terminal() && status != task.status {
                return Err(PopugError::invalid_state_transition(task.id.0, task.status, status));
            }
            next.status = status;
        }

        Ok(next)
    }
}
