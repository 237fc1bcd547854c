//! Integration tests for the event pipeline.
//!
//! Tests cover:
//! - Producer validation and the encode/decode round trip
//! - Outbox relay retry after publish failures
//! - Consumer liveness on handler failures
//! - Consumer termination on broker read failures
//! - Dead-lettering and shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use popug_core::config::{ConsumerConfig, OutboxConfig};
use popug_core::db::MemoryDatabase;
use popug_core::error::{ErrorCode, PopugError, Result};
use popug_core::events::{Envelope, IdentityPayload, TaskEvent, TaskPayload, Topics};
use popug_core::pipeline::{
    Broker, BrokerMessage, ConsumerLoop, InMemoryBroker, OutboxRelay, OutboxStore, Producer, Subscription,
    TaskTrackerHandler,
};
use popug_core::projection::{AssigneeId, AssigneeProjection};
use popug_core::random::SeededRandom;
use popug_core::schema::SchemaRegistry;
use popug_core::tasks::{NewTask, TaskLifecycleEngine};

// ============================================================================
// Test Utilities
// ============================================================================

/// Fails the first `fail_first` publishes, then delegates.
struct UnreliableBroker {
    inner: InMemoryBroker,
    fail_first: u64,
    calls: AtomicU64,
}

impl UnreliableBroker {
    fn new(inner: InMemoryBroker, fail_first: u64) -> Self {
        Self {
            inner,
            fail_first,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Broker for UnreliableBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::Relaxed) < self.fail_first {
            return Err(PopugError::publish_failed(topic, "broker unavailable"));
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn subscribe(&self, group: &str, topics: &[String]) -> Result<Box<dyn Subscription>> {
        self.inner.subscribe(group, topics).await
    }
}

/// Every read fails.
struct BrokenBroker;

struct BrokenSubscription;

#[async_trait]
impl Subscription for BrokenSubscription {
    async fn next(&mut self) -> Result<Option<BrokerMessage>> {
        Err(PopugError::broker_read_failed("connection reset"))
    }

    async fn commit(&mut self, _message: &BrokerMessage) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Broker for BrokenBroker {
    async fn publish(&self, _topic: &str, _key: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _group: &str, _topics: &[String]) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(BrokenSubscription))
    }
}

fn producer() -> Producer {
    Producer::new(Arc::new(SchemaRegistry::builtin().unwrap()), Topics::default())
}

fn task_payload() -> TaskPayload {
    TaskPayload {
        id: Uuid::new_v4(),
        title: "feed the parrots".into(),
        jira_id: "POPUG-3".into(),
        assignee_id: Uuid::new_v4(),
    }
}

fn user_created(id: Uuid, username: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "name": "UserCreated",
        "data": {"id": id, "username": username}
    }))
    .unwrap()
}

fn tracker(db: Arc<MemoryDatabase>, broker: Arc<dyn Broker>, config: ConsumerConfig) -> ConsumerLoop {
    ConsumerLoop::new(
        broker,
        Arc::new(TaskTrackerHandler::new(AssigneeProjection::new(db))),
        Topics::default(),
        "task-tracker",
        config,
    )
}

// ============================================================================
// Producer
// ============================================================================

#[tokio::test]
async fn test_round_trip_preserves_envelope() {
    let broker = InMemoryBroker::new();
    let producer = producer();
    let event = TaskEvent::TaskAssigned(task_payload());
    let original = event.to_envelope().unwrap();

    let messages = producer.prepare_task_events(&[event]).unwrap();
    producer.publish(&broker, &messages).await.unwrap();

    let mut sub = broker.subscribe("g", &["tasks-stream".to_string()]).await.unwrap();
    let received = sub.next().await.unwrap().unwrap();
    let decoded = Envelope::decode(&received.topic, &received.payload).unwrap();

    assert_eq!(decoded, original);
    assert_eq!(decoded.version, Some(2));
}

#[tokio::test]
async fn test_version_one_event_is_rejected_before_publish() {
    let broker = InMemoryBroker::new();
    let producer = producer();
    let envelope = Envelope::new("TaskAssigned", Some(1), serde_json::to_value(task_payload()).unwrap());

    let err = producer.prepare("tasks-stream", "k", &envelope).unwrap_err();

    assert_eq!(err.code(), ErrorCode::SchemaNotFound);
    assert!(broker.messages("tasks-stream").is_empty());
}

#[tokio::test]
async fn test_invalid_payload_is_rejected() {
    let producer = producer();
    let envelope = Envelope::new("TaskCompleted", Some(2), json!({"id": Uuid::new_v4()}));

    let err = producer.prepare("tasks-stream", "k", &envelope).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
}

// ============================================================================
// Outbox Relay
// ============================================================================

#[tokio::test]
async fn test_failed_publish_stays_pending_until_a_later_pass() {
    let db = Arc::new(MemoryDatabase::new());
    let projection = AssigneeProjection::new(db.clone());
    projection
        .upsert(&IdentityPayload {
            id: Uuid::new_v4(),
            username: Some("kesha".into()),
            role: None,
        })
        .await
        .unwrap();
    let engine = TaskLifecycleEngine::new(db.clone(), projection, producer(), Arc::new(SeededRandom::new(1)));
    let first = engine.create_task(NewTask::new("a", "a")).await.unwrap();
    let second = engine.create_task(NewTask::new("b", "b")).await.unwrap();

    let inner = InMemoryBroker::new();
    let relay = OutboxRelay::new(
        db.clone(),
        Arc::new(UnreliableBroker::new(inner.clone(), 1)),
        OutboxConfig::default(),
    );

    let pass = relay.relay_once().await.unwrap();
    assert!(pass.failed);
    assert_eq!(pass.published, 0);
    assert_eq!(db.pending_count().await.unwrap(), 2);
    let pending = db.pending_messages(10).await.unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.is_some());

    let pass = relay.relay_once().await.unwrap();
    assert!(!pass.failed);
    assert_eq!(pass.published, 2);
    assert_eq!(db.pending_count().await.unwrap(), 0);

    // Outbox order is preserved on the topic.
    let keys: Vec<String> = inner.messages("tasks-stream").into_iter().map(|m| m.key).collect();
    assert_eq!(keys, vec![first.id.to_string(), second.id.to_string()]);
    assert_eq!(relay.stats().failures(), 1);
    assert_eq!(relay.stats().published(), 2);
}

#[tokio::test]
async fn test_relay_run_publishes_and_stops_on_shutdown() {
    let db = Arc::new(MemoryDatabase::new());
    let projection = AssigneeProjection::new(db.clone());
    projection
        .upsert(&IdentityPayload {
            id: Uuid::new_v4(),
            username: Some("rio".into()),
            role: None,
        })
        .await
        .unwrap();
    let engine = TaskLifecycleEngine::new(db.clone(), projection, producer(), Arc::new(SeededRandom::new(1)));
    engine.create_task(NewTask::new("a", "a")).await.unwrap();

    let broker = InMemoryBroker::new();
    let config = OutboxConfig {
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let relay = OutboxRelay::new(db.clone(), Arc::new(broker.clone()), config);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(relay.run(rx));

    let mut sub = broker.subscribe("g", &["tasks-stream".to_string()]).await.unwrap();
    let delivered = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(delivered.topic, "tasks-stream");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

// ============================================================================
// Consumer Loop
// ============================================================================

#[tokio::test]
async fn test_handler_failure_does_not_stop_the_loop() {
    let db = Arc::new(MemoryDatabase::new());
    let broker = InMemoryBroker::new();
    let kept = Uuid::new_v4();

    broker.publish("users-stream", "bad", b"not json").await.unwrap();
    broker
        .publish("users-stream", &kept.to_string(), &user_created(kept, "kiwi"))
        .await
        .unwrap();
    broker.close();

    let consumer = tracker(db.clone(), Arc::new(broker.clone()), ConsumerConfig::default());
    let stats = consumer.stats();
    let (_tx, rx) = tokio::sync::watch::channel(false);

    consumer.run(rx).await.unwrap();

    assert_eq!(stats.processed(), 2);
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.succeeded(), 1);
    assert_eq!(broker.lag("task-tracker", "users-stream"), 0);

    let projection = AssigneeProjection::new(db);
    assert_eq!(projection.get(AssigneeId(kept)).await.unwrap().username, "kiwi");
}

#[tokio::test]
async fn test_read_failure_terminates_the_loop() {
    let db = Arc::new(MemoryDatabase::new());
    let consumer = tracker(db, Arc::new(BrokenBroker), ConsumerConfig::default());
    let (_tx, rx) = tokio::sync::watch::channel(false);

    let err = consumer.run(rx).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BrokerReadFailed);
}

#[tokio::test]
async fn test_poisoned_message_is_dead_lettered() {
    let db = Arc::new(MemoryDatabase::new());
    let broker = InMemoryBroker::new();
    broker.publish("users-stream", "bad", b"{\"oops\":true}").await.unwrap();
    broker.close();

    let config = ConsumerConfig {
        dead_letter_topic: Some("users-stream-dlq".into()),
        ..Default::default()
    };
    let consumer = tracker(db, Arc::new(broker.clone()), config);
    let stats = consumer.stats();
    let (_tx, rx) = tokio::sync::watch::channel(false);

    consumer.run(rx).await.unwrap();

    assert_eq!(stats.dead_lettered(), 1);
    let dead = broker.messages("users-stream-dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"{\"oops\":true}".to_vec());
}

#[tokio::test]
async fn test_shutdown_stops_an_idle_consumer() {
    let db = Arc::new(MemoryDatabase::new());
    let broker = InMemoryBroker::new();
    let consumer = tracker(db, Arc::new(broker), ConsumerConfig::default());
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(consumer.run(rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}
