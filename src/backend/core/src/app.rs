//! Service wiring.
//!
//! [`App`] assembles stores, broker, producer and engines from a [`Config`]
//! and hands out the long-running loops for the configured role.

use std::sync::Arc;

use crate::config::{Config, ServiceRole};
use crate::db::{Database, MemoryDatabase};
use crate::error::Result;
use crate::events::Topics;
use crate::ledger::{LedgerEngine, LedgerRepository};
use crate::pipeline::{
    self, AccountingHandler, Broker, ConsumerLoop, EventHandler, IdentityPublisher, OutboxRelay, OutboxStore,
    Producer, TaskTrackerHandler,
};
use crate::projection::{AssigneeProjection, AssigneeStore};
use crate::random::{RandomSource, ThreadRandom};
use crate::schema::SchemaRegistry;
use crate::tasks::{TaskLifecycleEngine, TaskRepository};

/// Every repository seam, usually backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub assignees: Arc<dyn AssigneeStore>,
    pub tasks: Arc<dyn TaskRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    /// All seams backed by one in-memory store.
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryDatabase::new()))
    }

    pub fn from_memory(db: Arc<MemoryDatabase>) -> Self {
        Self {
            assignees: db.clone(),
            tasks: db.clone(),
            ledger: db.clone(),
            outbox: db,
        }
    }

    pub fn from_database(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            assignees: db.clone(),
            tasks: db.clone(),
            ledger: db.clone(),
            outbox: db,
        }
    }

    /// Postgres when a URL is configured, otherwise in-memory.
    pub async fn open(config: &Config) -> Result<Self> {
        match config.database.url.as_deref() {
            Some(url) => {
                let db = Database::connect(url, &config.database).await?;
                if config.database.migrate {
                    db.migrate().await?;
                }
                tracing::info!("Connected to database");
                Ok(Self::from_database(db))
            }
            None => {
                tracing::warn!("No database URL configured; using the in-memory store");
                Ok(Self::memory())
            }
        }
    }
}

/// A fully wired service.
pub struct App {
    pub config: Config,
    pub stores: Stores,
    pub broker: Arc<dyn Broker>,
    pub producer: Producer,
    pub projection: AssigneeProjection,
    pub tasks: Arc<TaskLifecycleEngine>,
    pub ledger: LedgerEngine,
}

impl App {
    /// Open the configured store and broker.
    pub async fn build(config: Config) -> Result<Self> {
        let stores = Stores::open(&config).await?;
        let broker = pipeline::connect(&config.broker)?;
        Self::from_parts(config, stores, broker, Arc::new(ThreadRandom))
    }

    /// Wire from explicit parts.
    pub fn from_parts(
        config: Config,
        stores: Stores,
        broker: Arc<dyn Broker>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let registry = Arc::new(SchemaRegistry::builtin()?);
        let producer = Producer::new(registry, Topics::from(&config.broker));
        let projection = AssigneeProjection::new(stores.assignees.clone());
        let tasks = Arc::new(TaskLifecycleEngine::new(
            stores.tasks.clone(),
            projection.clone(),
            producer.clone(),
            rng.clone(),
        ));
        let ledger = LedgerEngine::new(stores.ledger.clone(), rng, config.ledger.clone());

        Ok(Self {
            config,
            stores,
            broker,
            producer,
            projection,
            tasks,
            ledger,
        })
    }

    pub fn role(&self) -> ServiceRole {
        self.config.service.role
    }

    /// The event handler for the configured role.
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        match self.role() {
            ServiceRole::TaskTracker => Arc::new(TaskTrackerHandler::new(self.projection.clone())),
            ServiceRole::Accounting => Arc::new(AccountingHandler::new(self.projection.clone(), self.ledger.clone())),
        }
    }

    pub fn consumer(&self) -> ConsumerLoop {
        ConsumerLoop::new(
            self.broker.clone(),
            self.handler(),
            self.producer.topics().clone(),
            self.config.broker.consumer_group.clone(),
            self.config.consumer.clone(),
        )
    }

    pub fn relay(&self) -> OutboxRelay {
        OutboxRelay::new(self.stores.outbox.clone(), self.broker.clone(), self.config.outbox.clone())
    }

    pub fn identity_publisher(&self) -> IdentityPublisher {
        IdentityPublisher::new(self.producer.clone(), self.broker.clone())
    }
}
