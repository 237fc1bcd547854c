//! Consumer loop.
//!
//! One loop per service. Each message is decoded, dispatched to the
//! service's [`EventHandler`] and committed whatever the outcome: a failing
//! message is retried up to `max_attempts`, dead-lettered when a topic is
//! configured, logged, and then skipped. Only a broker read error ends the
//! loop, and it is returned to the host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::Instrument;

use super::broker::{Broker, BrokerMessage, Subscription};
use super::handlers::EventHandler;
use crate::config::ConsumerConfig;
use crate::error::{PopugError, Result};
use crate::events::{Envelope, InboundEvent, Topics};
use crate::observability::metrics;

/// Consumer counters.
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    /// Messages taken off the broker
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    /// Messages whose every attempt failed
    pub failed: Arc<AtomicU64>,
    pub dead_lettered: Arc<AtomicU64>,
    /// Extra handler attempts made
    pub retried: Arc<AtomicU64>,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    DeadLettered,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "ok",
            Outcome::Failed => "failed",
            Outcome::DeadLettered => "dead_lettered",
        }
    }
}

pub struct ConsumerLoop {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn EventHandler>,
    topics: Topics,
    group: String,
    config: ConsumerConfig,
    stats: ConsumerStats,
}

impl ConsumerLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn EventHandler>,
        topics: Topics,
        group: impl Into<String>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            topics,
            group: group.into(),
            config,
            stats: ConsumerStats::new(),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.clone()
    }

    /// Consume until shutdown, broker close, or a read error.
    ///
    /// A message already dequeued is always finished before shutdown is honoured.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let subscribed = self.handler.topics(&self.topics);
        let mut subscription = self.broker.subscribe(&self.group, &subscribed).await?;

        tracing::info!(
            handler = self.handler.name(),
            group = %self.group,
            topics = ?subscribed,
            max_attempts = self.config.max_attempts,
            "Consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = subscription.next() => match next {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        tracing::info!(handler = self.handler.name(), "Broker closed; consumer exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(handler = self.handler.name(), error = %e, "Broker read failed; consumer stopping");
                        return Err(e);
                    }
                },
            };

            let span = tracing::info_span!(
                "consume",
                topic = %message.topic,
                key = %message.key,
                offset = %message.offset
            );
            self.process(subscription.as_mut(), message).instrument(span).await;
        }

        tracing::info!(
            handler = self.handler.name(),
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Consumer stopped"
        );
        Ok(())
    }

    /// Handle, dead-letter if needed, and commit one message.
    pub async fn process(&self, subscription: &mut dyn Subscription, message: BrokerMessage) -> Outcome {
        let started = Instant::now();
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.dispatch(&message).await {
            Ok(()) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                Outcome::Succeeded
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                e.log();
                self.dead_letter(&message).await
            }
        };

        if let Err(e) = subscription.commit(&message).await {
            tracing::warn!(error = %e, "Commit failed; message may be redelivered");
        }

        metrics::record_consumed(&message.topic, outcome.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    async fn dispatch(&self, message: &BrokerMessage) -> Result<()> {
        let envelope = Envelope::decode(&message.topic, &message.payload)?;
        let event = InboundEvent::decode(&self.topics, &message.topic, &envelope)?;

        let mut attempt = 1;
        loop {
            match self.handler.handle(&event).await {
                Ok(()) => {
                    tracing::debug!(name = event.name(), attempt, "Event handled");
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_attempts && e.is_retryable() => {
                    tracing::warn!(name = event.name(), attempt, error = %e, "Handler failed; retrying");
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.with_context("event", event.name())),
            }
        }
    }

    async fn dead_letter(&self, message: &BrokerMessage) -> Outcome {
        let Some(topic) = self.config.dead_letter_topic.as_deref() else {
            return Outcome::Failed;
        };

        match self.broker.publish(topic, &message.key, &message.payload).await {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                metrics::record_dead_lettered(&message.topic);
                tracing::warn!(dead_letter_topic = topic, "Message dead-lettered");
                Outcome::DeadLettered
            }
            Err(e) => {
                let e = PopugError::publish_failed(topic, e.to_string());
                e.log();
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::pipeline::broker::InMemoryBroker;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Fails the first `fail_first` calls with a retryable error.
    struct Flaky {
        fail_first: u64,
        calls: AtomicU64,
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn topics(&self, topics: &Topics) -> Vec<String> {
            vec![topics.identity.clone()]
        }

        async fn handle(&self, event: &InboundEvent) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            if n < self.fail_first {
                return Err(PopugError::new(ErrorCode::DatabaseQueryFailed, "boom"));
            }
            self.seen.lock().push(event.name());
            Ok(())
        }
    }

    fn flaky(fail_first: u64) -> Arc<Flaky> {
        Arc::new(Flaky {
            fail_first,
            calls: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn user_created() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "name": "UserCreated",
            "data": {"id": uuid::Uuid::new_v4(), "username": "kiwi"}
        }))
        .unwrap()
    }

    async fn message(broker: &InMemoryBroker, payload: &[u8]) -> (Box<dyn Subscription>, BrokerMessage) {
        broker.publish("users-stream", "k", payload).await.unwrap();
        let mut sub = broker.subscribe("g", &["users-stream".to_string()]).await.unwrap();
        let m = sub.next().await.unwrap().unwrap();
        (sub, m)
    }

    #[tokio::test]
    async fn test_success_commits() {
        let broker = InMemoryBroker::new();
        let handler = flaky(0);
        let consumer = ConsumerLoop::new(
            Arc::new(broker.clone()),
            handler.clone(),
            Topics::default(),
            "g",
            ConsumerConfig::default(),
        );

        let (mut sub, m) = message(&broker, &user_created()).await;
        assert_eq!(consumer.process(sub.as_mut(), m).await, Outcome::Succeeded);
        assert_eq!(broker.lag("g", "users-stream"), 0);
        assert_eq!(*handler.seen.lock(), vec!["UserCreated"]);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let broker = InMemoryBroker::new();
        let handler = flaky(2);
        let config = ConsumerConfig {
            max_attempts: 3,
            retry_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let consumer = ConsumerLoop::new(Arc::new(broker.clone()), handler.clone(), Topics::default(), "g", config);

        let (mut sub, m) = message(&broker, &user_created()).await;
        assert_eq!(consumer.process(sub.as_mut(), m).await, Outcome::Succeeded);
        assert_eq!(consumer.stats().retried(), 2);
    }

    #[tokio::test]
    async fn test_failure_without_retry_is_committed_and_skipped() {
        let broker = InMemoryBroker::new();
        let consumer = ConsumerLoop::new(
            Arc::new(broker.clone()),
            flaky(1),
            Topics::default(),
            "g",
            ConsumerConfig::default(),
        );

        let (mut sub, m) = message(&broker, &user_created()).await;
        assert_eq!(consumer.process(sub.as_mut(), m).await, Outcome::Failed);
        assert_eq!(broker.lag("g", "users-stream"), 0);
        assert_eq!(consumer.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_goes_to_dead_letter_topic() {
        let broker = InMemoryBroker::new();
        let config = ConsumerConfig {
            dead_letter_topic: Some("users-dlq".into()),
            ..Default::default()
        };
        let consumer = ConsumerLoop::new(Arc::new(broker.clone()), flaky(0), Topics::default(), "g", config);

        let (mut sub, m) = message(&broker, b"{not json").await;
        assert_eq!(consumer.process(sub.as_mut(), m).await, Outcome::DeadLettered);
        let dlq = broker.messages("users-dlq");
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].payload, b"{not json".to_vec());
    }
}
