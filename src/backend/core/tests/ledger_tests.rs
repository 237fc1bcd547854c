//! Integration tests for the Ledger Engine.
//!
//! Tests cover:
//! - Amount ranges per event kind
//! - Balance as the sum of an assignee's entries
//! - Management income and daily balances
//! - Audit trail

use std::sync::Arc;

use fake::faker::lorem::en::Sentence;
use fake::Fake;
use uuid::Uuid;

use popug_core::config::LedgerConfig;
use popug_core::db::MemoryDatabase;
use popug_core::events::{TaskEvent, TaskPayload};
use popug_core::ledger::{AccountEntry, EntryKind, LedgerEngine};
use popug_core::projection::AssigneeId;
use popug_core::random::SeededRandom;

// ============================================================================
// Test Utilities
// ============================================================================

fn ledger(seed: u64) -> (Arc<MemoryDatabase>, LedgerEngine) {
    let db = Arc::new(MemoryDatabase::new());
    let engine = LedgerEngine::new(db.clone(), Arc::new(SeededRandom::new(seed)), LedgerConfig::default());
    (db, engine)
}

fn task_for(assignee: AssigneeId) -> TaskPayload {
    TaskPayload {
        id: Uuid::new_v4(),
        title: Sentence(2..5).fake(),
        jira_id: String::new(),
        assignee_id: assignee.0,
    }
}

fn sum_for(entries: &[AccountEntry], assignee: AssigneeId) -> i64 {
    entries
        .iter()
        .filter(|e| e.assignee_id == assignee)
        .map(|e| e.credit + e.debit)
        .sum()
}

// ============================================================================
// Booking
// ============================================================================

#[tokio::test]
async fn test_assigned_withdraws_within_range() {
    let (_, engine) = ledger(5);
    let a = AssigneeId(Uuid::new_v4());

    let entry = engine.record_for_task_assigned(a, &task_for(a)).await.unwrap();

    assert!((-20..=-10).contains(&entry.credit));
    assert_eq!(entry.debit, 0);
    assert_eq!(entry.kind(), EntryKind::Withdrawal);
    assert_eq!(engine.get_balance(a).await.unwrap(), entry.credit);
}

#[tokio::test]
async fn test_completed_pays_within_range() {
    let (_, engine) = ledger(5);
    let a = AssigneeId(Uuid::new_v4());

    let entry = engine.record_for_task_completed(a, &task_for(a)).await.unwrap();

    assert!((20..=40).contains(&entry.debit));
    assert_eq!(entry.credit, 0);
    assert_eq!(entry.kind(), EntryKind::Payment);
}

#[tokio::test]
async fn test_reassigned_withdraws_from_new_assignee() {
    let (_, engine) = ledger(5);
    let new_owner = AssigneeId(Uuid::new_v4());
    let event = TaskEvent::TasksReassigned(task_for(new_owner));

    let entry = engine.record_task_event(&event).await.unwrap();

    assert_eq!(entry.assignee_id, new_owner);
    assert!(entry.credit < 0);
}

#[tokio::test]
async fn test_unknown_assignee_has_zero_balance() {
    let (_, engine) = ledger(5);
    assert_eq!(engine.get_balance(AssigneeId(Uuid::new_v4())).await.unwrap(), 0);
}

#[tokio::test]
async fn test_balance_is_sum_of_own_entries() {
    let (db, engine) = ledger(99);
    let people: Vec<AssigneeId> = (0..3).map(|_| AssigneeId(Uuid::new_v4())).collect();

    // Interleave bookings across assignees.
    for round in 0..20 {
        let who = people[round % people.len()];
        let task = task_for(who);
        let event = if round % 3 == 0 {
            TaskEvent::TaskCompleted(task)
        } else {
            TaskEvent::TaskAssigned(task)
        };
        engine.record_task_event(&event).await.unwrap();
    }

    let entries = db.ledger_entries();
    for who in &people {
        assert_eq!(engine.get_balance(*who).await.unwrap(), sum_for(&entries, *who));
    }
}

// ============================================================================
// Aggregates
// ============================================================================

#[tokio::test]
async fn test_management_income_negates_day_total() {
    let (db, engine) = ledger(17);
    let a = AssigneeId(Uuid::new_v4());
    let b = AssigneeId(Uuid::new_v4());

    engine.record_for_task_assigned(a, &task_for(a)).await.unwrap();
    engine.record_for_task_assigned(b, &task_for(b)).await.unwrap();
    engine.record_for_task_completed(a, &task_for(a)).await.unwrap();

    let entries = db.ledger_entries();
    let day = entries[0].created.date_naive();
    let total: i64 = entries.iter().map(AccountEntry::amount).sum();

    assert_eq!(engine.management_income_on(day).await.unwrap(), -total);

    let yesterday = day.pred_opt().unwrap();
    assert_eq!(engine.management_income_on(yesterday).await.unwrap(), 0);
}

#[tokio::test]
async fn test_daily_balances_group_by_assignee() {
    let (db, engine) = ledger(17);
    let a = AssigneeId(Uuid::new_v4());
    let b = AssigneeId(Uuid::new_v4());

    engine.record_for_task_assigned(a, &task_for(a)).await.unwrap();
    engine.record_for_task_completed(a, &task_for(a)).await.unwrap();
    engine.record_for_task_assigned(b, &task_for(b)).await.unwrap();

    let entries = db.ledger_entries();
    let day = entries[0].created.date_naive();
    let balances = engine.daily_balances_on(day).await.unwrap();

    assert_eq!(balances.len(), 2);
    for balance in balances {
        assert_eq!(balance.balance, sum_for(&entries, balance.assignee_id));
    }
}

#[tokio::test]
async fn test_audit_log_links_entries_to_tasks() {
    let (_, engine) = ledger(3);
    let a = AssigneeId(Uuid::new_v4());
    let task = task_for(a);

    let assigned = engine.record_task_event(&TaskEvent::TaskAssigned(task.clone())).await.unwrap();
    let paid = engine.record_task_event(&TaskEvent::TaskCompleted(task.clone())).await.unwrap();

    let log = engine.get_audit_log(a).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].event_name, "TaskAssigned");
    assert_eq!(log[0].amount, assigned.amount());
    assert_eq!(log[1].event_name, "TaskCompleted");
    assert_eq!(log[1].amount, paid.amount());
    assert!(log.iter().all(|r| r.task_id == task.id && r.task_title == task.title));

    assert!(engine.get_audit_log(AssigneeId(Uuid::new_v4())).await.unwrap().is_empty());
}
