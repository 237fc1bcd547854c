//! Ledger engine: books task events as signed account entries.
//!
//! The ledger is append-only. Balances and income are always derived by
//! summing entries; nothing derived is ever stored.

pub mod model;

pub use model::{day_bounds, AccountEntry, AssigneeBalance, AuditRecord, EntryKind};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::events::{TaskEvent, TaskPayload};
use crate::observability::metrics;
use crate::projection::AssigneeId;
use crate::random::RandomSource;

/// Ledger storage.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Append an entry and its audit record atomically. Both rows get one
    /// store-assigned `created`, which is returned.
    async fn append_entry(&self, entry: &AccountEntry, audit: &AuditRecord) -> Result<DateTime<Utc>>;

    /// `Σcredit + Σdebit` over all of the assignee's entries; 0 when there are none.
    async fn balance_for(&self, assignee_id: AssigneeId) -> Result<i64>;

    /// `Σcredit + Σdebit` over entries created in `[from, to)`.
    async fn sum_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<i64>;

    /// Per-assignee sums over entries created in `[from, to)`, ordered by assignee.
    async fn balances_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AssigneeBalance>>;

    /// The assignee's audit records in creation order.
    async fn audit_log(&self, assignee_id: AssigneeId) -> Result<Vec<AuditRecord>>;
}

/// Books ledger entries and derives balances.
#[derive(Clone)]
pub struct LedgerEngine {
    repo: Arc<dyn LedgerRepository>,
    rng: Arc<dyn RandomSource>,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(repo: Arc<dyn LedgerRepository>, rng: Arc<dyn RandomSource>, config: LedgerConfig) -> Self {
        Self { repo, rng, config }
    }

    /// Withdraw from the assignee for a newly assigned task.
    pub async fn record_for_task_assigned(&self, assignee_id: AssigneeId, task: &TaskPayload) -> Result<AccountEntry> {
        self.book(EntryKind::Withdrawal, "TaskAssigned", assignee_id, task).await
    }

    /// Withdraw from the new assignee of a reassigned task.
    pub async fn record_for_task_reassigned(&self, assignee_id: AssigneeId, task: &TaskPayload) -> Result<AccountEntry> {
        self.book(EntryKind::Withdrawal, "TasksReassigned", assignee_id, task).await
    }

    /// Pay the assignee for a completed task.
    pub async fn record_for_task_completed(&self, assignee_id: AssigneeId, task: &TaskPayload) -> Result<AccountEntry> {
        self.book(EntryKind::Payment, "TaskCompleted", assignee_id, task).await
    }

    /// Book any task event against the assignee it names.
    pub async fn record_task_event(&self, event: &TaskEvent) -> Result<AccountEntry> {
        let task = event.payload();
        let assignee_id = AssigneeId(task.assignee_id);
        match event {
            TaskEvent::TaskAssigned(_) => self.record_for_task_assigned(assignee_id, task).await,
            TaskEvent::TasksReassigned(_) => self.record_for_task_reassigned(assignee_id, task).await,
            TaskEvent::TaskCompleted(_) => self.record_for_task_completed(assignee_id, task).await,
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn book(
        &self,
        kind: EntryKind,
        event_name: &str,
        assignee_id: AssigneeId,
        task: &TaskPayload,
    ) -> Result<AccountEntry> {
        let mut entry = match kind {
            EntryKind::Withdrawal => {
                AccountEntry::withdrawal(assignee_id, self.rng.amount(self.config.withdrawal_range()))
            }
            EntryKind::Payment => AccountEntry::payment(assignee_id, self.rng.amount(self.config.payment_range())),
        };
        let audit = AuditRecord {
            id: Uuid::new_v4(),
            event_name: event_name.to_string(),
            assignee_id,
            task_id: task.id,
            task_title: task.title.clone(),
            jira_id: task.jira_id.clone(),
            amount: entry.amount(),
            created: entry.created,
        };

        entry.created = self.repo.append_entry(&entry, &audit).await?;
        metrics::record_ledger_entry(kind.as_str());
        tracing::info!(
            assignee_id = %assignee_id,
            kind = kind.as_str(),
            amount = entry.amount(),
            "Ledger entry booked"
        );
        Ok(entry)
    }

    /// All-time balance of an assignee.
    pub async fn get_balance(&self, assignee_id: AssigneeId) -> Result<i64> {
        self.repo.balance_for(assignee_id).await
    }

    /// Management income for today (UTC).
    pub async fn get_management_income(&self) -> Result<i64> {
        self.management_income_on(Utc::now().date_naive()).await
    }

    /// Management income for one UTC day: the negated sum of that day's entries.
    pub async fn management_income_on(&self, day: NaiveDate) -> Result<i64> {
        let (from, to) = day_bounds(day);
        Ok(-self.repo.sum_between(from, to).await?)
    }

    pub async fn get_audit_log(&self, assignee_id: AssigneeId) -> Result<Vec<AuditRecord>> {
        self.repo.audit_log(assignee_id).await
    }

    /// Per-assignee balances for today (UTC).
    pub async fn get_daily_balances(&self) -> Result<Vec<AssigneeBalance>> {
        self.daily_balances_on(Utc::now().date_naive()).await
    }

    pub async fn daily_balances_on(&self, day: NaiveDate) -> Result<Vec<AssigneeBalance>> {
        let (from, to) = day_bounds(day);
        self.repo.balances_between(from, to).await
    }
}
