//! Domain events, one closed enum per topic.
//!
//! Events are converted to and from [`Envelope`]s by matching on the event
//! name; a name outside the enum is an unknown event, never a best guess.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Envelope;
use crate::error::{PopugError, Result};

// =============================================================================
// Identity Events
// =============================================================================

/// Identity payload as published by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPayload {
    pub id: Uuid,

    /// Absent on partial updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Events on the identity topic. Legacy and unversioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    UserCreated(IdentityPayload),
    UserUpdated(IdentityPayload),
    UserDeleted(IdentityPayload),
}

impl IdentityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IdentityEvent::UserCreated(_) => "UserCreated",
            IdentityEvent::UserUpdated(_) => "UserUpdated",
            IdentityEvent::UserDeleted(_) => "UserDeleted",
        }
    }

    pub fn payload(&self) -> &IdentityPayload {
        match self {
            IdentityEvent::UserCreated(p) | IdentityEvent::UserUpdated(p) | IdentityEvent::UserDeleted(p) => p,
        }
    }

    /// Partition key: the identity id.
    pub fn key(&self) -> String {
        self.payload().id.to_string()
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(self.name(), None, serde_json::to_value(self.payload())?))
    }

    pub fn from_envelope(topic: &str, envelope: &Envelope) -> Result<Self> {
        let payload = || -> Result<IdentityPayload> {
            serde_json::from_value(envelope.data.clone())
                .map_err(|e| PopugError::malformed_envelope(topic, e.to_string()))
        };
        match envelope.name.as_str() {
            "UserCreated" => Ok(IdentityEvent::UserCreated(payload()?)),
            "UserUpdated" => Ok(IdentityEvent::UserUpdated(payload()?)),
            "UserDeleted" => Ok(IdentityEvent::UserDeleted(payload()?)),
            other => Err(PopugError::unknown_event(topic, other)),
        }
    }
}

// =============================================================================
// Task Events
// =============================================================================

/// Payload shared by every task lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Task id
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub jira_id: String,
    pub assignee_id: Uuid,
}

/// Events on the task topic. Validated against schema version [`TaskEvent::VERSION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    TaskAssigned(TaskPayload),
    TasksReassigned(TaskPayload),
    TaskCompleted(TaskPayload),
}

impl TaskEvent {
    /// Schema version every task event is published under.
    pub const VERSION: u32 = 2;

    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::TaskAssigned(_) => "TaskAssigned",
            TaskEvent::TasksReassigned(_) => "TasksReassigned",
            TaskEvent::TaskCompleted(_) => "TaskCompleted",
        }
    }

    pub fn payload(&self) -> &TaskPayload {
        match self {
            TaskEvent::TaskAssigned(p) | TaskEvent::TasksReassigned(p) | TaskEvent::TaskCompleted(p) => p,
        }
    }

    /// Partition key: the task id.
    pub fn key(&self) -> String {
        self.payload().id.to_string()
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(
            self.name(),
            Some(Self::VERSION),
            serde_json::to_value(self.payload())?,
        ))
    }

    pub fn from_envelope(topic: &str, envelope: &Envelope) -> Result<Self> {
        let payload = || -> Result<TaskPayload> {
            serde_json::from_value(envelope.data.clone())
                .map_err(|e| PopugError::malformed_envelope(topic, e.to_string()))
        };
        match envelope.name.as_str() {
            "TaskAssigned" => Ok(TaskEvent::TaskAssigned(payload()?)),
            "TasksReassigned" => Ok(TaskEvent::TasksReassigned(payload()?)),
            "TaskCompleted" => Ok(TaskEvent::TaskCompleted(payload()?)),
            other => Err(PopugError::unknown_event(topic, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn task_payload() -> TaskPayload {
        TaskPayload {
            id: Uuid::new_v4(),
            title: "fix the beak".into(),
            jira_id: "POPUG-12".into(),
            assignee_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_task_event_envelope_is_versioned() {
        let event = TaskEvent::TaskCompleted(task_payload());
        let env = event.to_envelope().unwrap();
        assert_eq!(env.name, "TaskCompleted");
        assert_eq!(env.version, Some(2));
        assert_eq!(TaskEvent::from_envelope("tasks-stream", &env).unwrap(), event);
    }

    #[test]
    fn test_identity_event_envelope_is_unversioned() {
        let event = IdentityEvent::UserDeleted(IdentityPayload {
            id: Uuid::new_v4(),
            username: None,
            role: None,
        });
        let env = event.to_envelope().unwrap();
        assert_eq!(env.version, None);
        assert_eq!(env.data, json!({"id": event.payload().id}));
    }

    #[test]
    fn test_missing_jira_id_defaults_to_empty() {
        let id = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let env = Envelope::new(
            "TaskAssigned",
            Some(2),
            json!({"id": id, "title": "t", "assignee_id": assignee}),
        );
        let TaskEvent::TaskAssigned(payload) = TaskEvent::from_envelope("tasks-stream", &env).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(payload.jira_id, "");
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let env = Envelope::new("UserPromoted", None, json!({"id": Uuid::new_v4()}));
        let err = IdentityEvent::from_envelope("users-stream", &env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEvent);
    }

    #[test]
    fn test_bad_payload_is_malformed() {
        let env = Envelope::new("UserCreated", None, json!({"id": "not-a-uuid"}));
        let err = IdentityEvent::from_envelope("users-stream", &env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEnvelope);
    }
}
