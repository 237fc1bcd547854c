//! Database layer for Popug.
//!
//! Uses PostgreSQL for persistent storage with sqlx. [`Database`] implements
//! every repository trait; writes that emit events stage their outbox rows in
//! the same transaction. [`MemoryDatabase`] is the in-process equivalent.

pub mod memory;

pub use memory::MemoryDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, ErrorContext, PopugError, Result};
use crate::ledger::{AccountEntry, AssigneeBalance, AuditRecord, LedgerRepository};
use crate::pipeline::{OutboxMessage, OutboxStore, OutgoingMessage};
use crate::projection::{Assignee, AssigneeId, AssigneeStore};
use crate::tasks::{StageEvents, Task, TaskId, TaskRepository, TaskStatus};

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| {
                PopugError::with_internal(
                    ErrorCode::DatabaseConnectionFailed,
                    "Failed to connect to PostgreSQL",
                    e.to_string(),
                )
                .with_source(e)
            })?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn stage_outbox(tx: &mut Transaction<'_, Postgres>, messages: &[OutgoingMessage]) -> Result<()> {
        for m in messages {
            sqlx::query(
                r#"
                INSERT INTO outbox (topic, key, name, payload)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&m.topic)
            .bind(&m.key)
            .bind(&m.name)
            .bind(&m.payload)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Assignee Operations
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl AssigneeStore for Database {
    #[instrument(skip(self))]
    async fn upsert_assignee(&self, id: AssigneeId, username: Option<&str>) -> Result<Assignee> {
        let row = sqlx::query_as::<_, AssigneeRow>(
            r#"
            INSERT INTO assignees (id, username)
            VALUES ($1, COALESCE($2, ''))
            ON CONFLICT (id) DO UPDATE SET
                username = COALESCE($2, assignees.username)
            RETURNING id, username
            "#,
        )
        .bind(id.0)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete_assignee(&self, id: AssigneeId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM assignees WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_assignee(&self, id: AssigneeId) -> Result<Option<Assignee>> {
        let row = sqlx::query_as::<_, AssigneeRow>("SELECT id, username FROM assignees WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_assignees(&self) -> Result<Vec<Assignee>> {
        let rows = sqlx::query_as::<_, AssigneeRow>("SELECT id, username FROM assignees ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Task Operations
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TaskRepository for Database {
    #[instrument(skip(self, task, outbox), fields(task_id = %task.id))]
    async fn insert_task(&self, task: &Task, outbox: &[OutgoingMessage]) -> Result<DateTime<Utc>> {
        let mut tx = self.pool.begin().await?;

        let created: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO tasks (id, title, description, jira_id, status, assignee_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created
            "#,
        )
        .bind(task.id.0)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.jira_id)
        .bind(task.status.as_str())
        .bind(task.assignee_id.0)
        .fetch_one(&mut *tx)
        .await?;

        Self::stage_outbox(&mut tx, outbox).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, description, jira_id, status, assignee_id, created
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, description, jira_id, status, assignee_id, created
            FROM tasks
            ORDER BY created, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    #[instrument(skip(self, task, outbox), fields(task_id = %task.id))]
    async fn update_task(
        &self,
        task: &Task,
        expected: TaskStatus,
        outbox: &[OutgoingMessage],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET title = $2, description = $3, jira_id = $4, status = $5, assignee_id = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(task.id.0)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.jira_id)
        .bind(task.status.as_str())
        .bind(task.assignee_id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }
        Self::stage_outbox(&mut tx, outbox).await?;
        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self, assignments, stage), fields(count = assignments.len()))]
    async fn reassign_tasks(
        &self,
        assignments: &[(TaskId, AssigneeId)],
        stage: &StageEvents<'_>,
    ) -> Result<Vec<Task>> {
        let mut tx = self.pool.begin().await?;

        let mut written = Vec::with_capacity(assignments.len());
        for (task_id, assignee_id) in assignments {
            let row = sqlx::query_as::<_, TaskRow>(
                r#"
                UPDATE tasks
                SET assignee_id = $2
                WHERE id = $1
                RETURNING id, title, description, jira_id, status, assignee_id, created
                "#,
            )
            .bind(task_id.0)
            .bind(assignee_id.0)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                written.push(Task::try_from(row)?);
            }
        }

        let outbox = stage(&written)?;
        Self::stage_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;
        Ok(written)
    }

    async fn delete_task(&self, id: TaskId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Ledger Operations
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl LedgerRepository for Database {
    #[instrument(skip(self, entry, audit), fields(assignee_id = %entry.assignee_id))]
    async fn append_entry(&self, entry: &AccountEntry, audit: &AuditRecord) -> Result<DateTime<Utc>> {
        let mut tx = self.pool.begin().await?;

        // NOW() is the transaction start, so both rows share one timestamp.
        let created: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO account (id, assignee_id, credit, debit)
            VALUES ($1, $2, $3, $4)
            RETURNING created
            "#,
        )
        .bind(entry.id)
        .bind(entry.assignee_id.0)
        .bind(entry.credit)
        .bind(entry.debit)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, event_name, assignee_id, task_id, task_title, jira_id, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(audit.id)
        .bind(&audit.event_name)
        .bind(audit.assignee_id.0)
        .bind(audit.task_id)
        .bind(&audit.task_title)
        .bind(&audit.jira_id)
        .bind(audit.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn balance_for(&self, assignee_id: AssigneeId) -> Result<i64> {
        let balance: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit + debit), 0)::BIGINT FROM account WHERE assignee_id = $1",
        )
        .bind(assignee_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn sum_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit + debit), 0)::BIGINT FROM account WHERE created >= $1 AND created < $2",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn balances_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AssigneeBalance>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT assignee_id, COALESCE(SUM(credit + debit), 0)::BIGINT AS balance
            FROM account
            WHERE created >= $1 AND created < $2
            GROUP BY assignee_id
            ORDER BY assignee_id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AssigneeBalance {
                assignee_id: AssigneeId(r.assignee_id),
                balance: r.balance,
            })
            .collect())
    }

    async fn audit_log(&self, assignee_id: AssigneeId) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, event_name, assignee_id, task_id, task_title, jira_id, amount, created
            FROM audit_log
            WHERE assignee_id = $1
            ORDER BY created, id
            "#,
        )
        .bind(assignee_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Outbox Operations
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl OutboxStore for Database {
    async fn pending_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, topic, key, name, payload, created, published_at, attempts, last_error
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_published(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE outbox SET published_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct AssigneeRow {
    pub id: Uuid,
    pub username: String,
}

impl From<AssigneeRow> for Assignee {
    fn from(row: AssigneeRow) -> Self {
        Assignee {
            id: AssigneeId(row.id),
            username: row.username,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub jira_id: String,
    pub status: String,
    pub assignee_id: Uuid,
    pub created: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = PopugError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: TaskId(row.id),
            title: row.title,
            description: row.description,
            jira_id: row.jira_id,
            status: row.status.parse()?,
            assignee_id: AssigneeId(row.assignee_id),
            created: row.created,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BalanceRow {
    pub assignee_id: Uuid,
    pub balance: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct AuditRow {
    pub id: Uuid,
    pub event_name: String,
    pub assignee_id: Uuid,
    pub task_id: Uuid,
    pub task_title: String,
    pub jira_id: String,
    pub amount: i64,
    pub created: DateTime<Utc>,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        AuditRecord {
            id: row.id,
            event_name: row.event_name,
            assignee_id: AssigneeId(row.assignee_id),
            task_id: row.task_id,
            task_title: row.task_title,
            jira_id: row.jira_id,
            amount: row.amount,
            created: row.created,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub topic: String,
    pub key: String,
    pub name: String,
    pub payload: Vec<u8>,
    pub created: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        OutboxMessage {
            id: row.id,
            topic: row.topic,
            key: row.key,
            name: row.name,
            payload: row.payload,
            created: row.created,
            published_at: row.published_at,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
        }
    }
}
