//! Producer path: validate, encode, then publish or stage in the outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use super::broker::Broker;
use crate::error::Result;
use crate::events::{Envelope, IdentityEvent, TaskEvent, Topics};
use crate::observability::metrics;
use crate::schema::SchemaRegistry;

/// A validated, encoded message ready to be stored or published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: String,
    /// Event name, kept for logs and metrics
    pub name: String,
    pub payload: Vec<u8>,
}

/// A row of the transactional outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Monotonic; the relay publishes in id order
    pub id: i64,
    pub topic: String,
    pub key: String,
    pub name: String,
    pub payload: Vec<u8>,
    pub created: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Validates events against the schema registry and turns them into broker messages.
#[derive(Clone)]
pub struct Producer {
    registry: Arc<SchemaRegistry>,
    topics: Topics,
}

impl Producer {
    pub fn new(registry: Arc<SchemaRegistry>, topics: Topics) -> Self {
        Self { registry, topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate (when versioned) and encode one envelope.
    pub fn prepare(&self, topic: &str, key: &str, envelope: &Envelope) -> Result<OutgoingMessage> {
        self.registry.validate_envelope(envelope)?;
        Ok(OutgoingMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            name: envelope.name.clone(),
            payload: envelope.encode()?,
        })
    }

    /// Prepare task events for the task topic. Fails on the first invalid event.
    pub fn prepare_task_events(&self, events: &[TaskEvent]) -> Result<Vec<OutgoingMessage>> {
        events
            .iter()
            .map(|event| self.prepare(&self.topics.task, &event.key(), &event.to_envelope()?))
            .collect()
    }

    /// Prepare an identity event for the identity topic. Identity events are unversioned.
    pub fn prepare_identity_event(&self, event: &IdentityEvent) -> Result<OutgoingMessage> {
        self.prepare(&self.topics.identity, &event.key(), &event.to_envelope()?)
    }

    /// Publish prepared messages in order; the first failure aborts the rest.
    #[instrument(skip(self, broker, messages), fields(count = messages.len()))]
    pub async fn publish(&self, broker: &dyn Broker, messages: &[OutgoingMessage]) -> Result<()> {
        for message in messages {
            broker
                .publish(&message.topic, &message.key, &message.payload)
                .await?;
            metrics::record_published(&message.topic, &message.name);
            tracing::debug!(topic = %message.topic, key = %message.key, name = %message.name, "Event published");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::{IdentityPayload, TaskPayload};
    use crate::pipeline::broker::InMemoryBroker;
    use uuid::Uuid;

    fn producer() -> Producer {
        Producer::new(Arc::new(SchemaRegistry::builtin().unwrap()), Topics::default())
    }

    fn payload() -> TaskPayload {
        TaskPayload {
            id: Uuid::new_v4(),
            title: "sweep the perch".into(),
            jira_id: "POPUG-3".into(),
            assignee_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_prepare_task_event_is_keyed_by_task() {
        let p = payload();
        let messages = producer()
            .prepare_task_events(&[TaskEvent::TaskAssigned(p.clone())])
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "tasks-stream");
        assert_eq!(messages[0].key, p.id.to_string());
        assert_eq!(messages[0].name, "TaskAssigned");
    }

    #[test]
    fn test_invalid_task_event_is_rejected_before_encoding() {
        let mut p = payload();
        p.title.clear();
        let err = producer()
            .prepare_task_events(&[TaskEvent::TaskCompleted(p)])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
    }

    #[test]
    fn test_unregistered_version_is_rejected() {
        let env = Envelope::new("TaskAssigned", Some(1), serde_json::to_value(payload()).unwrap());
        let err = producer().prepare("tasks-stream", "k", &env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaNotFound);
    }

    #[test]
    fn test_identity_events_skip_validation() {
        let event = IdentityEvent::UserCreated(IdentityPayload {
            id: Uuid::new_v4(),
            username: None,
            role: None,
        });
        let message = producer().prepare_identity_event(&event).unwrap();
        assert_eq!(message.topic, "users-stream");
    }

    #[tokio::test]
    async fn test_publish_round_trips_envelope() {
        let broker = InMemoryBroker::new();
        let producer = producer();
        let event = TaskEvent::TaskAssigned(payload());
        let messages = producer.prepare_task_events(&[event.clone()]).unwrap();
        producer.publish(&broker, &messages).await.unwrap();

        let published = broker.messages("tasks-stream");
        let decoded = Envelope::decode("tasks-stream", &published[0].payload).unwrap();
        assert_eq!(decoded, event.to_envelope().unwrap());
    }
}
