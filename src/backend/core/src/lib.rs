#![allow(clippy::result_large_err)]
//! # Popug Core
//!
//! Event choreography for the Popug task tracker and accounting services.
//!
//! ## Architecture
//!
//! - **Schema Registry**: structural validation of versioned events before publish
//! - **Assignee Projection**: local mirror of identities, fed by identity events
//! - **Task Lifecycle Engine**: create, complete and reassign tasks; emits task events
//! - **Ledger Engine**: append-only account entries derived from task events
//! - **Event Pipeline**: producer, transactional outbox relay and consumer loop
//! - **Observability**: tracing, OTLP export and Prometheus metrics

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod projection;
pub mod random;
pub mod schema;
pub mod tasks;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, PopugError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::{App, Stores};
    pub use crate::config::{Config, ServiceRole};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, PopugError, Result};
    pub use crate::events::{Envelope, IdentityEvent, IdentityPayload, InboundEvent, TaskEvent, TaskPayload, Topics};
    pub use crate::ledger::{AccountEntry, AssigneeBalance, AuditRecord, LedgerEngine};
    pub use crate::pipeline::{
        Broker, ConsumerLoop, IdentityPublisher, InMemoryBroker, OutboxRelay, Producer, RedisStreamBroker,
    };
    pub use crate::projection::{Assignee, AssigneeId, AssigneeProjection};
    pub use crate::random::{RandomSource, SeededRandom, ThreadRandom};
    pub use crate::schema::SchemaRegistry;
    pub use crate::tasks::{NewTask, Task, TaskId, TaskLifecycleEngine, TaskStatus, TaskUpdate};
}
