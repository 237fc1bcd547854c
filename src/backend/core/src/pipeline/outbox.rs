//! Transactional outbox relay.
//!
//! Engines store their events in the outbox in the same transaction as the
//! state change. The relay publishes pending rows in id order and marks them
//! published, giving at-least-once delivery. A pass stops at the first failed
//! publish so later messages for the same key never overtake it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::broker::Broker;
use super::producer::OutboxMessage;
use crate::config::OutboxConfig;
use crate::error::Result;
use crate::observability::metrics;

/// Storage side of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished messages, by id, at most `limit`.
    async fn pending_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    async fn mark_published(&self, id: i64) -> Result<()>;

    /// Count a failed attempt and remember the error.
    async fn record_failure(&self, id: i64, error: &str) -> Result<()>;

    async fn pending_count(&self) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponential backoff between failing relay passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
        }
    }

    /// Delay before the next pass after `attempt` consecutive failures (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

impl From<&OutboxConfig> for ExponentialBackoff {
    fn from(config: &OutboxConfig) -> Self {
        Self::new(config.backoff_initial, config.backoff_max)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Relay
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayPass {
    pub published: usize,
    /// A publish failed and the pass stopped early
    pub failed: bool,
    /// The batch was full, so more rows are probably waiting
    pub saturated: bool,
}

/// Relay counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub published: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
    pub passes: Arc<AtomicU64>,
}

impl RelayStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

/// Publishes outbox rows to the broker.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    config: OutboxConfig,
    backoff: ExponentialBackoff,
    stats: RelayStats,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, broker: Arc<dyn Broker>, config: OutboxConfig) -> Self {
        let backoff = ExponentialBackoff::from(&config);
        Self {
            store,
            broker,
            config,
            backoff,
            stats: RelayStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.clone()
    }

    /// Publish one batch of pending messages.
    pub async fn relay_once(&self) -> Result<RelayPass> {
        let batch = self.store.pending_messages(self.config.batch_size).await?;
        let mut pass = RelayPass {
            saturated: batch.len() >= self.config.batch_size,
            ..Default::default()
        };

        for message in &batch {
            match self
                .broker
                .publish(&message.topic, &message.key, &message.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_published(message.id).await?;
                    metrics::record_published(&message.topic, &message.name);
                    pass.published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = message.id,
                        topic = %message.topic,
                        attempts = message.attempts + 1,
                        error = %e,
                        "Outbox publish failed; will retry"
                    );
                    self.store.record_failure(message.id, &e.to_string()).await?;
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    pass.failed = true;
                    break;
                }
            }
        }

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .published
            .fetch_add(pass.published as u64, Ordering::Relaxed);
        if !batch.is_empty() {
            metrics::record_relay_batch(pass.published);
            metrics::set_outbox_pending(self.store.pending_count().await?);
        }
        Ok(pass)
    }

    /// Run until `shutdown` flips to `true`. A pass in progress is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval = ?self.config.poll_interval,
            "Outbox relay started"
        );

        let mut consecutive_failures: u32 = 0;
        while !*shutdown.borrow() {
            let delay = match self.relay_once().await {
                Ok(pass) if pass.failed => {
                    consecutive_failures += 1;
                    self.backoff.delay_for_attempt(consecutive_failures - 1)
                }
                Ok(pass) => {
                    consecutive_failures = 0;
                    if pass.saturated {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Err(e) => {
                    e.log();
                    consecutive_failures += 1;
                    self.backoff.delay_for_attempt(consecutive_failures - 1)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(published = self.stats.published(), "Outbox relay stopped");
    }
}
