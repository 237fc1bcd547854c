//! Identity event emitter.
//!
//! Publishes the auth service's `UserCreated/UserUpdated/UserDeleted` events
//! directly to the broker. Used for operator bootstrapping and in tests.

use std::sync::Arc;
use uuid::Uuid;

use super::broker::Broker;
use super::producer::Producer;
use crate::error::Result;
use crate::events::{IdentityEvent, IdentityPayload};

pub struct IdentityPublisher {
    producer: Producer,
    broker: Arc<dyn Broker>,
}

impl IdentityPublisher {
    pub fn new(producer: Producer, broker: Arc<dyn Broker>) -> Self {
        Self { producer, broker }
    }

    pub async fn publish(&self, event: &IdentityEvent) -> Result<()> {
        let message = self.producer.prepare_identity_event(event)?;
        self.producer.publish(self.broker.as_ref(), &[message]).await
    }

    pub async fn user_created(&self, id: Uuid, username: &str, role: Option<&str>) -> Result<()> {
        self.publish(&IdentityEvent::UserCreated(IdentityPayload {
            id,
            username: Some(username.to_string()),
            role: role.map(str::to_string),
        }))
        .await
    }

    /// Fields left `None` are omitted from the event.
    pub async fn user_updated(&self, id: Uuid, username: Option<&str>, role: Option<&str>) -> Result<()> {
        self.publish(&IdentityEvent::UserUpdated(IdentityPayload {
            id,
            username: username.map(str::to_string),
            role: role.map(str::to_string),
        }))
        .await
    }

    pub async fn user_deleted(&self, id: Uuid) -> Result<()> {
        self.publish(&IdentityEvent::UserDeleted(IdentityPayload {
            id,
            username: None,
            role: None,
        }))
        .await
    }
}
