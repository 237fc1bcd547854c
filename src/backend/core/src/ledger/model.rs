//! Ledger records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::projection::AssigneeId;

/// What a ledger entry books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Charged when a task is assigned; booked as a negative credit
    Withdrawal,
    /// Paid when a task is completed; booked as a positive debit
    Payment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::Payment => "payment",
        }
    }
}

/// One append-only account entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: Uuid,
    pub assignee_id: AssigneeId,
    /// Zero or negative
    pub credit: i64,
    /// Zero or positive
    pub debit: i64,
    /// Replaced by the store's timestamp when the entry is appended
    pub created: DateTime<Utc>,
}

impl AccountEntry {
    pub fn withdrawal(assignee_id: AssigneeId, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignee_id,
            credit: -amount.abs(),
            debit: 0,
            created: Utc::now(),
        }
    }

    pub fn payment(assignee_id: AssigneeId, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignee_id,
            credit: 0,
            debit: amount.abs(),
            created: Utc::now(),
        }
    }

    /// Signed contribution to the assignee's balance.
    pub fn amount(&self) -> i64 {
        self.credit + self.debit
    }

    pub fn kind(&self) -> EntryKind {
        if self.credit < 0 {
            EntryKind::Withdrawal
        } else {
            EntryKind::Payment
        }
    }
}

/// Links a ledger entry to the task event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_name: String,
    pub assignee_id: AssigneeId,
    pub task_id: Uuid,
    pub task_title: String,
    pub jira_id: String,
    /// Signed amount booked by the entry
    pub amount: i64,
    pub created: DateTime<Utc>,
}

/// Balance of one assignee over some window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeBalance {
    pub assignee_id: AssigneeId,
    pub balance: i64,
}

/// `[start, end)` of a UTC calendar day.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}
