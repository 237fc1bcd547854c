//! Event pipeline.
//!
//! - **`broker`**: the transport seam and the in-process broker
//! - **`redis`**: Redis Streams transport
//! - **`producer`**: validate and encode events into broker messages
//! - **`outbox`**: relay from the transactional outbox to the broker
//! - **`consumer`**: the per-service consume, dispatch and commit loop
//! - **`handlers`**: task tracker and accounting event handlers
//! - **`identity`**: identity event emitter

pub mod broker;
pub mod consumer;
pub mod handlers;
pub mod identity;
pub mod outbox;
pub mod producer;
pub mod redis;

pub use broker::{Broker, BrokerMessage, InMemoryBroker, Subscription};
pub use consumer::{ConsumerLoop, ConsumerStats, Outcome};
pub use handlers::{AccountingHandler, EventHandler, TaskTrackerHandler};
pub use identity::IdentityPublisher;
pub use outbox::{ExponentialBackoff, OutboxRelay, OutboxStore, RelayPass, RelayStats};
pub use producer::{OutboxMessage, OutgoingMessage, Producer};
pub use self::redis::RedisStreamBroker;

use std::sync::Arc;

use crate::config::{BrokerConfig, BrokerTransport};
use crate::error::Result;

/// Build the configured transport.
pub fn connect(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    match config.transport {
        BrokerTransport::Redis => Ok(Arc::new(RedisStreamBroker::new(config)?)),
        BrokerTransport::Memory => Ok(Arc::new(InMemoryBroker::new())),
    }
}
