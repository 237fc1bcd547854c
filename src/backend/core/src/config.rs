//! Configuration management.
//!
//! Values come from an optional file plus `POPUG__SECTION__KEY` environment
//! variables; every section has defaults so a bare environment boots a
//! single-process development service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{PopugError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Which service this process runs
    #[serde(default)]
    pub service: ServiceConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Consumer loop configuration
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Outbox relay configuration
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Ledger amount ranges
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// The service a process plays in the choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    /// Owns tasks, projects identities, emits task events
    #[default]
    TaskTracker,
    /// Projects identities, books task events into the ledger
    Accounting,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::TaskTracker => "task-tracker",
            ServiceRole::Accounting => "accounting",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub role: ServiceRole,

    /// Service name reported to tracing backends
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            role: ServiceRole::default(),
            name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            migrate: true,
        }
    }
}

/// Broker transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerTransport {
    /// Redis Streams with consumer groups
    #[default]
    Redis,
    /// In-process broker, for tests and single-process development
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub transport: BrokerTransport,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Consumer group; one durable cursor per service
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name inside the group
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// How long a read blocks waiting for messages
    #[serde(default = "default_block", with = "humantime_serde")]
    pub block: Duration,

    /// Maximum messages fetched per read
    #[serde(default = "default_read_batch")]
    pub batch_size: usize,

    /// Topic carrying identity events
    #[serde(default = "default_identity_topic")]
    pub identity_topic: String,

    /// Topic carrying task lifecycle events
    #[serde(default = "default_task_topic")]
    pub task_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: BrokerTransport::default(),
            redis_url: default_redis_url(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            block: default_block(),
            batch_size: default_read_batch(),
            identity_topic: default_identity_topic(),
            task_topic: default_task_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Handler attempts per message; 1 disables retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between handler attempts
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Topic receiving messages whose handler failed every attempt
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            dead_letter_topic: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Idle wait between relay passes
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum pending messages published per pass
    #[serde(default = "default_outbox_batch")]
    pub batch_size: usize,

    /// First backoff after a failed publish
    #[serde(default = "default_backoff_initial", with = "humantime_serde")]
    pub backoff_initial: Duration,

    /// Backoff ceiling
    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_outbox_batch(),
            backoff_initial: default_backoff_initial(),
            backoff_max: default_backoff_max(),
        }
    }
}

/// Amount ranges drawn by the ledger, both inclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_withdrawal_min")]
    pub withdrawal_min: i64,

    #[serde(default = "default_withdrawal_max")]
    pub withdrawal_max: i64,

    #[serde(default = "default_payment_min")]
    pub payment_min: i64,

    #[serde(default = "default_payment_max")]
    pub payment_max: i64,
}

impl LedgerConfig {
    pub fn withdrawal_range(&self) -> RangeInclusive<i64> {
        self.withdrawal_min..=self.withdrawal_max
    }

    pub fn payment_range(&self) -> RangeInclusive<i64> {
        self.payment_min..=self.payment_max
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            withdrawal_min: default_withdrawal_min(),
            withdrawal_max: default_withdrawal_max(),
            payment_min: default_payment_min(),
            payment_max: default_payment_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Prometheus scrape listener
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: true,
            metrics_addr: None,
        }
    }
}

// Default value functions
fn default_service_name() -> String { "popug".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_true() -> bool { true }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_consumer_group() -> String { "popug".to_string() }
fn default_consumer_name() -> String { "popug-1".to_string() }
fn default_block() -> Duration { Duration::from_secs(1) }
fn default_read_batch() -> usize { 16 }
fn default_identity_topic() -> String { "users-stream".to_string() }
fn default_task_topic() -> String { "tasks-stream".to_string() }
fn default_max_attempts() -> u32 { 1 }
fn default_retry_delay() -> Duration { Duration::from_millis(200) }
fn default_poll_interval() -> Duration { Duration::from_millis(500) }
fn default_outbox_batch() -> usize { 100 }
fn default_backoff_initial() -> Duration { Duration::from_secs(1) }
fn default_backoff_max() -> Duration { Duration::from_secs(30) }
fn default_withdrawal_min() -> i64 { 10 }
fn default_withdrawal_max() -> i64 { 20 }
fn default_payment_min() -> i64 { 20 }
fn default_payment_max() -> i64 { 40 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from the environment, optionally layered over a file.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("POPUG").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        let ledger = &self.ledger;
        if ledger.withdrawal_min < 0 || ledger.withdrawal_min > ledger.withdrawal_max {
            return Err(PopugError::configuration(format!(
                "ledger withdrawal range {}..={} is invalid",
                ledger.withdrawal_min, ledger.withdrawal_max
            )));
        }
        if ledger.payment_min < 0 || ledger.payment_min > ledger.payment_max {
            return Err(PopugError::configuration(format!(
                "ledger payment range {}..={} is invalid",
                ledger.payment_min, ledger.payment_max
            )));
        }
        if self.consumer.max_attempts == 0 {
            return Err(PopugError::configuration("consumer.max_attempts must be at least 1"));
        }
        if self.outbox.batch_size == 0 || self.broker.batch_size == 0 {
            return Err(PopugError::configuration("batch sizes must be greater than zero"));
        }
        if self.broker.identity_topic == self.broker.task_topic {
            return Err(PopugError::configuration("identity and task topics must differ"));
        }
        Ok(())
    }
}
