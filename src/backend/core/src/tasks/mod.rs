//! Task lifecycle engine.
//!
//! Creates tasks, assigns them to a random known assignee, transitions their
//! status and reassigns the whole board. Every event an operation emits is
//! validated before anything is stored, and is written to the outbox in the
//! same transaction as the task rows.

pub mod model;

pub use model::{NewTask, Task, TaskId, TaskStatus, TaskUpdate};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::instrument;

use crate::error::{PopugError, Result};
use crate::events::TaskEvent;
use crate::observability::metrics;
use crate::pipeline::{OutgoingMessage, Producer};
use crate::projection::{pick_from, AssigneeId, AssigneeProjection};
use crate::random::RandomSource;

/// Builds the outbox rows for a batch of tasks as they were written.
pub type StageEvents<'a> = dyn Fn(&[Task]) -> Result<Vec<OutgoingMessage>> + Send + Sync + 'a;

/// Task storage. Writes that carry outbox messages store them atomically with the tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new task. The store assigns `created` and returns it.
    async fn insert_task(&self, task: &Task, outbox: &[OutgoingMessage]) -> Result<DateTime<Utc>>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Overwrite a stored task if its status is still `expected`.
    ///
    /// Returns `false` and writes nothing (outbox included) when the task is
    /// gone or its status moved since it was read.
    async fn update_task(
        &self,
        task: &Task,
        expected: TaskStatus,
        outbox: &[OutgoingMessage],
    ) -> Result<bool>;

    /// Set the assignee of each listed task in one transaction, leaving every
    /// other column as stored. Tasks deleted in the meantime are skipped.
    /// `stage` builds the outbox from the rows as written; returns those rows.
    async fn reassign_tasks(
        &self,
        assignments: &[(TaskId, AssigneeId)],
        stage: &StageEvents<'_>,
    ) -> Result<Vec<Task>>;

    /// Remove a task; returns rows affected.
    async fn delete_task(&self, id: TaskId) -> Result<u64>;
}

pub struct TaskLifecycleEngine {
    tasks: Arc<dyn TaskRepository>,
    assignees: AssigneeProjection,
    producer: Producer,
    rng: Arc<dyn RandomSource>,
}

impl TaskLifecycleEngine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        assignees: AssigneeProjection,
        producer: Producer,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            tasks,
            assignees,
            producer,
            rng,
        }
    }

    /// Create a task assigned to a random known assignee and emit `TaskAssigned`.
    #[instrument(skip(self, new), fields(title = %new.title))]
    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        new.validate()?;
        let assignee = self.assignees.pick_random(self.rng.as_ref()).await?;

        let mut task = Task {
            id: TaskId::new(),
            title: new.title,
            description: new.description,
            jira_id: new.jira_id,
            status: TaskStatus::Assigned,
            assignee_id: assignee.id,
            created: Utc::now(),
        };
        let outbox = self
            .producer
            .prepare_task_events(&[TaskEvent::TaskAssigned(task.to_payload())])?;

        task.created = self.tasks.insert_task(&task, &outbox).await?;
        metrics::record_task_created();
        tracing::info!(task_id = %task.id, assignee_id = %task.assignee_id, "Task created");
        Ok(task)
    }

    /// Merge caller fields into a task.
    ///
    /// Emits `TaskCompleted` only on the write that moves the task from
    /// `Assigned` to `Completed`. Later updates of a completed task emit nothing.
    #[instrument(skip(self, update))]
    pub async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        // Status only moves forward, so a lost race retries at most once.
        loop {
            let current = self.get_task(id).await?;
            let next = update.apply(&current)?;

            let completed = !current.status.is_terminal() && next.status.is_terminal();
            let outbox = if completed {
                self.producer
                    .prepare_task_events(&[TaskEvent::TaskCompleted(next.to_payload())])?
            } else {
                Vec::new()
            };

            if !self.tasks.update_task(&next, current.status, &outbox).await? {
                tracing::debug!(task_id = %id, "Task changed concurrently, retrying update");
                continue;
            }
            if completed {
                metrics::record_task_completed();
                tracing::info!(task_id = %id, assignee_id = %next.assignee_id, "Task completed");
            }
            return Ok(next);
        }
    }

    /// Shorthand for an update that only completes the task.
    pub async fn complete_task(&self, id: TaskId) -> Result<Task> {
        self.update_task(id, TaskUpdate::complete()).await
    }

    /// Give every task a fresh random assignee, one independent draw per task.
    ///
    /// Only the assignee column is written. All rows and their
    /// `TasksReassigned` events commit together or not at all.
    #[instrument(skip(self))]
    pub async fn reassign_all_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.list_tasks().await?;
        if tasks.is_empty() {
            return Err(PopugError::nothing_to_reassign());
        }
        let pool = self.assignees.get_all().await?;

        let mut assignments = Vec::with_capacity(tasks.len());
        for task in &tasks {
            assignments.push((task.id, pick_from(&pool, self.rng.as_ref())?.id));
        }

        let stage = |rows: &[Task]| {
            let events: Vec<TaskEvent> = rows
                .iter()
                .map(|task| TaskEvent::TasksReassigned(task.to_payload()))
                .collect();
            self.producer.prepare_task_events(&events)
        };
        let reassigned = self.tasks.reassign_tasks(&assignments, &stage).await?;
        metrics::record_tasks_reassigned(reassigned.len() as u64);
        tracing::info!(count = reassigned.len(), pool = pool.len(), "Tasks reassigned");
        Ok(reassigned)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.tasks
            .get_task(id)
            .await?
            .ok_or_else(|| PopugError::task_not_found(id.0))
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.tasks.list_tasks().await
    }

    /// Administrative delete. Emits nothing.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        match self.tasks.delete_task(id).await? {
            0 => Err(PopugError::task_not_found(id.0)),
            _ => {
                tracing::info!(task_id = %id, "Task deleted");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::error::ErrorCode;
    use crate::events::{IdentityPayload, Topics};
    use crate::random::SeededRandom;
    use crate::schema::SchemaRegistry;
    use uuid::Uuid;

    async fn setup(assignees: usize) -> (Arc<MemoryDatabase>, TaskLifecycleEngine) {
        let db = Arc::new(MemoryDatabase::new());
        let projection = AssigneeProjection::new(db.clone());
        for i in 0..assignees {
            projection
                .upsert(&IdentityPayload {
                    id: Uuid::new_v4(),
                    username: Some(format!("popug-{}", i)),
                    role: None,
                })
                .await
                .unwrap();
        }
        let engine = TaskLifecycleEngine::new(
            db.clone(),
            projection,
            Producer::new(Arc::new(SchemaRegistry::builtin().unwrap()), Topics::default()),
            Arc::new(SeededRandom::new(7)),
        );
        (db, engine)
    }

    #[tokio::test]
    async fn test_create_requires_assignees() {
        let (db, engine) = setup(0).await;
        let err = engine.create_task(NewTask::new("t1", "d1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyAssigneePool);
        assert!(engine.list_tasks().await.unwrap().is_empty());
        assert!(db.outbox_messages().is_empty());
    }

    #[tokio::test]
    async fn test_create_stages_task_assigned() {
        let (db, engine) = setup(2).await;
        let task = engine.create_task(NewTask::new("t1", "d1")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);

        let outbox = db.outbox_messages();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].name, "TaskAssigned");
        assert_eq!(outbox[0].key, task.id.to_string());
    }

    #[tokio::test]
    async fn test_completion_emits_once_per_task() {
        let (db, engine) = setup(1).await;
        let task = engine.create_task(NewTask::new("t1", "d1")).await.unwrap();

        let renamed = engine
            .update_task(
                task.id,
                TaskUpdate {
                    title: Some("t2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.title, "t2");
        assert_eq!(db.outbox_messages().len(), 1);

        engine.complete_task(task.id).await.unwrap();
        engine.complete_task(task.id).await.unwrap();
        let edited = engine
            .update_task(
                task.id,
                TaskUpdate {
                    title: Some("t3".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, TaskStatus::Completed);

        let names: Vec<String> = db.outbox_messages().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["TaskAssigned", "TaskCompleted"]);
    }

    #[tokio::test]
    async fn test_create_returns_stored_timestamp() {
        let (_db, engine) = setup(1).await;
        let task = engine.create_task(NewTask::new("t1", "d1")).await.unwrap();
        assert_eq!(engine.get_task(task.id).await.unwrap().created, task.created);
    }

    #[tokio::test]
    async fn test_reassign_with_no_tasks() {
        let (_db, engine) = setup(2).await;
        let err = engine.reassign_all_tasks().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NothingToReassign);
    }

    #[tokio::test]
    async fn test_delete_unknown_task() {
        let (_db, engine) = setup(1).await;
        let err = engine.delete_task(TaskId::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let (_db, engine) = setup(1).await;
        assert_eq!(
            engine.get_task(TaskId::new()).await.unwrap_err().code(),
            ErrorCode::TaskNotFound
        );
    }
}
