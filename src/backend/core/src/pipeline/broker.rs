//! Broker seam and the in-process transport.
//!
//! A [`Broker`] appends keyed messages to named topics and hands out
//! consumer-group [`Subscription`]s. Within a topic, delivery order is
//! append order, which preserves per-key ordering.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Result;

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    /// Transport-specific position, used when committing.
    pub offset: String,
}

/// Message transport shared by producers and consumers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append one message to `topic`.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;

    /// Join consumer group `group` on `topics`.
    async fn subscribe(&self, group: &str, topics: &[String]) -> Result<Box<dyn Subscription>>;
}

/// Consumer-group cursor over one or more topics.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` means the transport was closed.
    async fn next(&mut self) -> Result<Option<BrokerMessage>>;

    /// Mark `message` as processed for the group.
    async fn commit(&mut self, message: &BrokerMessage) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Broker
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<StoredMessage>>,
    /// Next uncommitted index per `(group, topic)`.
    committed: HashMap<(String, String), usize>,
    next_seq: u64,
    closed: bool,
}

/// In-process broker for tests and single-process development.
///
/// Consumer groups resume from their last committed position, so a new
/// subscription for the same group redelivers anything left uncommitted.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the broker; subscriptions drain what is left and then end.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Everything ever published to `topic`, in order.
    pub fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        let state = self.state.lock();
        state
            .topics
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(i, m)| BrokerMessage {
                        topic: topic.to_string(),
                        key: m.key.clone(),
                        payload: m.payload.clone(),
                        offset: i.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages in `topic` not yet committed by `group`.
    pub fn lag(&self, group: &str, topic: &str) -> usize {
        let state = self.state.lock();
        let len = state.topics.get(topic).map(Vec::len).unwrap_or(0);
        let committed = state
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0);
        len.saturating_sub(committed)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.topics.entry(topic.to_string()).or_default().push(StoredMessage {
                seq,
                key: key.to_string(),
                payload: payload.to_vec(),
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, group: &str, topics: &[String]) -> Result<Box<dyn Subscription>> {
        let cursors = {
            let state = self.state.lock();
            topics
                .iter()
                .map(|t| {
                    let start = state
                        .committed
                        .get(&(group.to_string(), t.clone()))
                        .copied()
                        .unwrap_or(0);
                    (t.clone(), start)
                })
                .collect()
        };
        Ok(Box::new(InMemorySubscription {
            broker: self.clone(),
            group: group.to_string(),
            cursors,
        }))
    }
}

struct InMemorySubscription {
    broker: InMemoryBroker,
    group: String,
    /// Next index to deliver per topic.
    cursors: Vec<(String, usize)>,
}

impl InMemorySubscription {
    /// Oldest undelivered message across the subscribed topics.
    fn poll(&mut self) -> Option<BrokerMessage> {
        let state = self.broker.state.lock();
        let mut best: Option<(usize, u64)> = None;
        for (i, (topic, cursor)) in self.cursors.iter().enumerate() {
            if let Some(m) = state.topics.get(topic).and_then(|log| log.get(*cursor)) {
                if best.map(|(_, seq)| m.seq < seq).unwrap_or(true) {
                    best = Some((i, m.seq));
                }
            }
        }

        let (i, _) = best?;
        let (topic, cursor) = &mut self.cursors[i];
        let stored = &state.topics[topic.as_str()][*cursor];
        let message = BrokerMessage {
            topic: topic.clone(),
            key: stored.key.clone(),
            payload: stored.payload.clone(),
            offset: cursor.to_string(),
        };
        *cursor += 1;
        Some(message)
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<BrokerMessage>> {
        loop {
            let notify = self.broker.notify.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.poll() {
                return Ok(Some(message));
            }
            if self.broker.state.lock().closed {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<()> {
        let index: usize = message.offset.parse().unwrap_or(0);
        let mut state = self.broker.state.lock();
        let committed = state
            .committed
            .entry((self.group.clone(), message.topic.clone()))
            .or_insert(0);
        *committed = (*committed).max(index + 1);
        Ok(())
    }
}
