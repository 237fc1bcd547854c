//! Event contract shared by every service.
//!
//! - **`envelope`**: the `{name, version?, data}` wire wrapper.
//! - **`event`**: closed per-topic event enums (`IdentityEvent`, `TaskEvent`).
//!
//! [`InboundEvent::decode`] routes a received envelope by topic, then by
//! name, into one of those enums.

pub mod envelope;
pub mod event;

pub use envelope::Envelope;
pub use event::{IdentityEvent, IdentityPayload, TaskEvent, TaskPayload};

use crate::config::BrokerConfig;
use crate::error::{PopugError, Result};

/// Topic names used by the choreography.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub identity: String,
    pub task: String,
}

impl Topics {
    pub fn new(identity: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            task: task.into(),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for Topics {
    fn from(config: &BrokerConfig) -> Self {
        Self::new(config.identity_topic.clone(), config.task_topic.clone())
    }
}

/// Any event a consumer can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Identity(IdentityEvent),
    Task(TaskEvent),
}

impl InboundEvent {
    /// Dispatch by `(topic, name)`.
    pub fn decode(topics: &Topics, topic: &str, envelope: &Envelope) -> Result<Self> {
        if topic == topics.identity {
            IdentityEvent::from_envelope(topic, envelope).map(InboundEvent::Identity)
        } else if topic == topics.task {
            TaskEvent::from_envelope(topic, envelope).map(InboundEvent::Task)
        } else {
            Err(PopugError::unknown_event(topic, &envelope.name))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Identity(e) => e.name(),
            InboundEvent::Task(e) => e.name(),
        }
    }
}
