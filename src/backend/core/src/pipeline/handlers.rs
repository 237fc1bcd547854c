//! Per-service event handlers.

use async_trait::async_trait;

use crate::error::{PopugError, Result};
use crate::events::{IdentityEvent, InboundEvent, Topics};
use crate::ledger::LedgerEngine;
use crate::projection::{AssigneeId, AssigneeProjection};

/// Applies decoded events to local state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs
    fn name(&self) -> &'static str;

    /// Topics this handler consumes.
    fn topics(&self, topics: &Topics) -> Vec<String>;

    async fn handle(&self, event: &InboundEvent) -> Result<()>;
}

/// Identity events feed the projection. Create and update are the same upsert.
async fn apply_identity(projection: &AssigneeProjection, event: &IdentityEvent) -> Result<()> {
    match event {
        IdentityEvent::UserCreated(identity) | IdentityEvent::UserUpdated(identity) => {
            projection.upsert(identity).await?;
        }
        IdentityEvent::UserDeleted(identity) => {
            projection.delete(AssigneeId(identity.id)).await?;
        }
    }
    Ok(())
}

/// Task tracker: keeps the assignee pool current.
pub struct TaskTrackerHandler {
    projection: AssigneeProjection,
}

impl TaskTrackerHandler {
    pub fn new(projection: AssigneeProjection) -> Self {
        Self { projection }
    }
}

#[async_trait]
impl EventHandler for TaskTrackerHandler {
    fn name(&self) -> &'static str {
        "task-tracker"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        vec![topics.identity.clone()]
    }

    async fn handle(&self, event: &InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Identity(e) => apply_identity(&self.projection, e).await,
            InboundEvent::Task(e) => Err(PopugError::unknown_event("task", e.name())),
        }
    }
}

/// Accounting: projects identities and books task events into the ledger.
pub struct AccountingHandler {
    projection: AssigneeProjection,
    ledger: LedgerEngine,
}

impl AccountingHandler {
    pub fn new(projection: AssigneeProjection, ledger: LedgerEngine) -> Self {
        Self { projection, ledger }
    }
}

#[async_trait]
impl EventHandler for AccountingHandler {
    fn name(&self) -> &'static str {
        "accounting"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        vec![topics.identity.clone(), topics.task.clone()]
    }

    async fn handle(&self, event: &InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Identity(e) => apply_identity(&self.projection, e).await,
            InboundEvent::Task(e) => self.ledger.record_task_event(e).await.map(|_| ()),
        }
    }
}
