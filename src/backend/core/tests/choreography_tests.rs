//! End-to-end choreography between the task tracker and accounting services.
//!
//! Both services run in one process over a shared in-memory broker, each
//! with its own store, consumer group and outbox relay.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fake::faker::internet::en::Username;
use fake::Fake;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use popug_core::app::{App, Stores};
use popug_core::config::{Config, ServiceRole};
use popug_core::error::Result;
use popug_core::pipeline::InMemoryBroker;
use popug_core::projection::AssigneeId;
use popug_core::random::SeededRandom;
use popug_core::tasks::NewTask;

// ============================================================================
// Test Utilities
// ============================================================================

fn service(role: ServiceRole, broker: &InMemoryBroker, seed: u64) -> App {
    let mut config = Config::default();
    config.service.role = role;
    config.broker.consumer_group = role.as_str().to_string();
    App::from_parts(
        config,
        Stores::memory(),
        Arc::new(broker.clone()),
        Arc::new(SeededRandom::new(seed)),
    )
    .unwrap()
}

fn start(app: &App, shutdown: &watch::Receiver<bool>) -> JoinHandle<Result<()>> {
    tokio::spawn(app.consumer().run(shutdown.clone()))
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_identity_to_ledger_choreography() {
    let broker = InMemoryBroker::new();
    let tracker = service(ServiceRole::TaskTracker, &broker, 1);
    let accounting = service(ServiceRole::Accounting, &broker, 2);
    let (tracker, accounting) = (&tracker, &accounting);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tracker_loop = start(tracker, &shutdown_rx);
    let accounting_loop = start(accounting, &shutdown_rx);

    // The auth service announces a user; both projections pick it up.
    let user = Uuid::new_v4();
    let username: String = Username().fake();
    tracker
        .identity_publisher()
        .user_created(user, &username, Some("worker"))
        .await
        .unwrap();

    eventually(|| async move { tracker.projection.get(AssigneeId(user)).await.is_ok() }).await;
    eventually(|| async move { accounting.projection.get(AssigneeId(user)).await.is_ok() }).await;
    assert_eq!(tracker.projection.get(AssigneeId(user)).await.unwrap().username, username);

    // Creating a task withdraws from the only assignee once the event is relayed.
    let task = tracker.tasks.create_task(NewTask::new("clean cage", "all of it")).await.unwrap();
    assert_eq!(task.assignee_id, AssigneeId(user));
    assert_eq!(tracker.relay().relay_once().await.unwrap().published, 1);

    eventually(|| async move { accounting.ledger.get_balance(AssigneeId(user)).await.unwrap() < 0 }).await;
    let after_assign = accounting.ledger.get_balance(AssigneeId(user)).await.unwrap();
    assert!((-20..=-10).contains(&after_assign));

    // Completing it pays the assignee.
    tracker.tasks.complete_task(task.id).await.unwrap();
    tracker.relay().relay_once().await.unwrap();

    eventually(|| async move { accounting.ledger.get_audit_log(AssigneeId(user)).await.unwrap().len() == 2 }).await;
    let log = accounting.ledger.get_audit_log(AssigneeId(user)).await.unwrap();
    assert_eq!(log[0].event_name, "TaskAssigned");
    assert_eq!(log[1].event_name, "TaskCompleted");
    assert_eq!(log[1].task_id, task.id.0);

    let balance = accounting.ledger.get_balance(AssigneeId(user)).await.unwrap();
    assert_eq!(balance, log[0].amount + log[1].amount);
    assert_eq!(accounting.ledger.get_management_income().await.unwrap(), -balance);

    shutdown_tx.send(true).unwrap();
    tracker_loop.await.unwrap().unwrap();
    accounting_loop.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deleted_user_leaves_the_pool() {
    let broker = InMemoryBroker::new();
    let tracker = service(ServiceRole::TaskTracker, &broker, 3);
    let tracker = &tracker;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tracker_loop = start(tracker, &shutdown_rx);

    let publisher = tracker.identity_publisher();
    let kept = Uuid::new_v4();
    let gone = Uuid::new_v4();
    publisher.user_created(kept, "kesha", None).await.unwrap();
    publisher.user_created(gone, "rio", None).await.unwrap();
    publisher.user_deleted(gone).await.unwrap();
    publisher.user_updated(kept, Some("kesha-2"), None).await.unwrap();

    eventually(|| async move {
        tracker
            .projection
            .get(AssigneeId(kept))
            .await
            .map(|a| a.username == "kesha-2")
            .unwrap_or(false)
    })
    .await;
    assert_eq!(tracker.projection.get_all().await.unwrap().len(), 1);

    for _ in 0..5 {
        let task = tracker.tasks.create_task(NewTask::new("t", "d")).await.unwrap();
        assert_eq!(task.assignee_id, AssigneeId(kept));
    }

    shutdown_tx.send(true).unwrap();
    tracker_loop.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reassignment_is_booked_per_task() {
    let broker = InMemoryBroker::new();
    let tracker = service(ServiceRole::TaskTracker, &broker, 4);
    let accounting = service(ServiceRole::Accounting, &broker, 5);
    let (tracker, accounting) = (&tracker, &accounting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tracker_loop = start(tracker, &shutdown_rx);
    let accounting_loop = start(accounting, &shutdown_rx);

    let publisher = tracker.identity_publisher();
    for name in ["kesha", "rio", "kiwi"] {
        publisher.user_created(Uuid::new_v4(), name, None).await.unwrap();
    }
    eventually(|| async move { tracker.projection.get_all().await.unwrap().len() == 3 }).await;

    for i in 0..4 {
        tracker
            .tasks
            .create_task(NewTask::new(format!("task {}", i), "d"))
            .await
            .unwrap();
    }
    let reassigned = tracker.tasks.reassign_all_tasks().await.unwrap();
    assert_eq!(reassigned.len(), 4);

    let relay = tracker.relay();
    let mut published = 0;
    while published < 8 {
        published += relay.relay_once().await.unwrap().published;
    }

    // Every assigned and reassigned event withdraws from the named assignee.
    eventually(|| async move {
        let mut records = 0;
        for a in accounting.projection.get_all().await.unwrap() {
            records += accounting.ledger.get_audit_log(a.id).await.unwrap().len();
        }
        records == 8
    })
    .await;

    for task in &reassigned {
        let log = accounting.ledger.get_audit_log(task.assignee_id).await.unwrap();
        assert!(log
            .iter()
            .any(|r| r.event_name == "TasksReassigned" && r.task_id == task.id.0 && r.amount < 0));
    }

    shutdown_tx.send(true).unwrap();
    tracker_loop.await.unwrap().unwrap();
    accounting_loop.await.unwrap().unwrap();
}
