//! In-memory store.
//!
//! Implements every repository trait over one mutex-guarded state. Each call
//! takes the lock once, so every operation (including the multi-row ones) is
//! atomic, matching what the Postgres store gets from a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::{PopugError, Result};
use crate::ledger::{AccountEntry, AssigneeBalance, AuditRecord, LedgerRepository};
use crate::pipeline::{OutboxMessage, OutboxStore, OutgoingMessage};
use crate::projection::{Assignee, AssigneeId, AssigneeStore};
use crate::tasks::{StageEvents, Task, TaskId, TaskRepository, TaskStatus};

#[derive(Default)]
struct State {
    assignees: BTreeMap<AssigneeId, Assignee>,
    /// Insertion order
    tasks: Vec<Task>,
    entries: Vec<AccountEntry>,
    audit: Vec<AuditRecord>,
    outbox: Vec<OutboxMessage>,
    next_outbox_id: i64,
}

impl State {
    fn stage(&mut self, messages: &[OutgoingMessage]) {
        for m in messages {
            self.next_outbox_id += 1;
            self.outbox.push(OutboxMessage {
                id: self.next_outbox_id,
                topic: m.topic.clone(),
                key: m.key.clone(),
                name: m.name.clone(),
                payload: m.payload.clone(),
                created: Utc::now(),
                published_at: None,
                attempts: 0,
                last_error: None,
            });
        }
    }

    fn task_index(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

/// Process-local implementation of every store.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox row, published or not, in id order.
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.lock().outbox.clone()
    }

    /// Every ledger entry in append order.
    pub fn ledger_entries(&self) -> Vec<AccountEntry> {
        self.state.lock().entries.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assignees
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl AssigneeStore for MemoryDatabase {
    async fn upsert_assignee(&self, id: AssigneeId, username: Option<&str>) -> Result<Assignee> {
        let mut state = self.state.lock();
        let record = state.assignees.entry(id).or_insert_with(|| Assignee {
            id,
            username: String::new(),
        });
        if let Some(username) = username {
            record.username = username.to_string();
        }
        Ok(record.clone())
    }

    async fn delete_assignee(&self, id: AssigneeId) -> Result<u64> {
        Ok(self.state.lock().assignees.remove(&id).map(|_| 1).unwrap_or(0))
    }

    async fn get_assignee(&self, id: AssigneeId) -> Result<Option<Assignee>> {
        Ok(self.state.lock().assignees.get(&id).cloned())
    }

    async fn list_assignees(&self) -> Result<Vec<Assignee>> {
        Ok(self.state.lock().assignees.values().cloned().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TaskRepository for MemoryDatabase {
    async fn insert_task(&self, task: &Task, outbox: &[OutgoingMessage]) -> Result<DateTime<Utc>> {
        let mut state = self.state.lock();
        if state.task_index(task.id).is_some() {
            return Err(PopugError::new(
                crate::error::ErrorCode::DuplicateRecord,
                format!("Task already exists: {}", task.id),
            ));
        }
        let created = Utc::now();
        state.tasks.push(Task {
            created,
            ..task.clone()
        });
        state.stage(outbox);
        Ok(created)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let state = self.state.lock();
        Ok(state.task_index(id).map(|i| state.tasks[i].clone()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.state.lock().tasks.clone())
    }

    async fn update_task(
        &self,
        task: &Task,
        expected: TaskStatus,
        outbox: &[OutgoingMessage],
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let i = match state.task_index(task.id) {
            Some(i) if state.tasks[i].status == expected => i,
            _ => return Ok(false),
        };
        state.tasks[i] = Task {
            created: state.tasks[i].created,
            ..task.clone()
        };
        state.stage(outbox);
        Ok(true)
    }

    async fn reassign_tasks(
        &self,
        assignments: &[(TaskId, AssigneeId)],
        stage: &StageEvents<'_>,
    ) -> Result<Vec<Task>> {
        let mut state = self.state.lock();
        let mut written = Vec::with_capacity(assignments.len());
        for (task_id, assignee_id) in assignments {
            if let Some(i) = state.task_index(*task_id) {
                written.push((
                    i,
                    Task {
                        assignee_id: *assignee_id,
                        ..state.tasks[i].clone()
                    },
                ));
            }
        }

        let rows: Vec<Task> = written.iter().map(|(_, task)| task.clone()).collect();
        let outbox = stage(&rows)?;
        for (i, task) in &written {
            state.tasks[*i].assignee_id = task.assignee_id;
        }
        state.stage(&outbox);
        Ok(rows)
    }

    async fn delete_task(&self, id: TaskId) -> Result<u64> {
        let mut state = self.state.lock();
        match state.task_index(id) {
            Some(i) => {
                state.tasks.remove(i);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl LedgerRepository for MemoryDatabase {
    async fn append_entry(&self, entry: &AccountEntry, audit: &AuditRecord) -> Result<DateTime<Utc>> {
        let mut state = self.state.lock();
        let created = Utc::now();
        state.entries.push(AccountEntry {
            created,
            ..entry.clone()
        });
        state.audit.push(AuditRecord {
            created,
            ..audit.clone()
        });
        Ok(created)
    }

    async fn balance_for(&self, assignee_id: AssigneeId) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .filter(|e| e.assignee_id == assignee_id)
            .map(AccountEntry::amount)
            .sum())
    }

    async fn sum_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .filter(|e| e.created >= from && e.created < to)
            .map(AccountEntry::amount)
            .sum())
    }

    async fn balances_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AssigneeBalance>> {
        let state = self.state.lock();
        let mut sums: BTreeMap<AssigneeId, i64> = BTreeMap::new();
        for e in state.entries.iter().filter(|e| e.created >= from && e.created < to) {
            *sums.entry(e.assignee_id).or_default() += e.amount();
        }
        Ok(sums
            .into_iter()
            .map(|(assignee_id, balance)| AssigneeBalance { assignee_id, balance })
            .collect())
    }

    async fn audit_log(&self, assignee_id: AssigneeId) -> Result<Vec<AuditRecord>> {
        Ok(self
            .state
            .lock()
            .audit
            .iter()
            .filter(|a| a.assignee_id == assignee_id)
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outbox
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl OutboxStore for MemoryDatabase {
    async fn pending_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        Ok(self
            .state
            .lock()
            .outbox
            .iter()
            .filter(|m| m.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(m) = state.outbox.iter_mut().find(|m| m.id == id) {
            m.attempts += 1;
            m.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .outbox
            .iter()
            .filter(|m| m.published_at.is_none())
            .count() as u64)
    }
}
