//! Assignee projection: the local mirror of identities owned by the auth service.
//!
//! The projection is only ever written by consumed identity events. Upserts
//! and deletes are idempotent so redelivered events converge on the same
//! state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{PopugError, Result};
use crate::events::IdentityPayload;
use crate::random::RandomSource;

/// Identifier of an assignee (the identity id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssigneeId(pub Uuid);

impl std::fmt::Display for AssigneeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Projected identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: AssigneeId,
    pub username: String,
}

/// Storage for the projection.
#[async_trait]
pub trait AssigneeStore: Send + Sync {
    /// Insert or update. A `None` username keeps the stored one (or empty for a new row).
    async fn upsert_assignee(&self, id: AssigneeId, username: Option<&str>) -> Result<Assignee>;

    /// Remove; returns rows affected.
    async fn delete_assignee(&self, id: AssigneeId) -> Result<u64>;

    async fn get_assignee(&self, id: AssigneeId) -> Result<Option<Assignee>>;

    /// All assignees ordered by id.
    async fn list_assignees(&self) -> Result<Vec<Assignee>>;
}

/// Uniform pick from a pool snapshot.
pub fn pick_from<'a>(pool: &'a [Assignee], rng: &dyn RandomSource) -> Result<&'a Assignee> {
    if pool.is_empty() {
        return Err(PopugError::empty_assignee_pool());
    }
    Ok(&pool[rng.index(pool.len())])
}

/// Projection operations over an [`AssigneeStore`].
#[derive(Clone)]
pub struct AssigneeProjection {
    store: Arc<dyn AssigneeStore>,
}

impl AssigneeProjection {
    pub fn new(store: Arc<dyn AssigneeStore>) -> Self {
        Self { store }
    }

    /// Apply a created or updated identity.
    #[instrument(skip(self, identity), fields(assignee_id = %identity.id))]
    pub async fn upsert(&self, identity: &IdentityPayload) -> Result<Assignee> {
        let assignee = self
            .store
            .upsert_assignee(AssigneeId(identity.id), identity.username.as_deref())
            .await?;
        tracing::debug!(username = %assignee.username, "Assignee upserted");
        Ok(assignee)
    }

    /// Apply a deleted identity. Unknown ids are not an error; they report zero rows.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: AssigneeId) -> Result<u64> {
        let affected = self.store.delete_assignee(id).await?;
        if affected == 0 {
            tracing::warn!(assignee_id = %id, "Delete for unknown assignee affected no rows");
        }
        Ok(affected)
    }

    pub async fn get(&self, id: AssigneeId) -> Result<Assignee> {
        self.store
            .get_assignee(id)
            .await?
            .ok_or_else(|| PopugError::assignee_not_found(id.0))
    }

    pub async fn get_all(&self) -> Result<Vec<Assignee>> {
        self.store.list_assignees().await
    }

    /// Pick one assignee uniformly from the current pool.
    pub async fn pick_random(&self, rng: &dyn RandomSource) -> Result<Assignee> {
        let pool = self.get_all().await?;
        pick_from(&pool, rng).cloned()
    }
}
