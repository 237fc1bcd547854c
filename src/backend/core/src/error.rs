//! Error handling for the Popug core.
//!
//! This module provides:
//! - A single crate error type with machine-readable codes
//! - Severity classification driving log levels
//! - Structured details (entity, context, schema violations)
//! - Error counters through the `metrics` facade
//!
//! # Usage
//!
//! ```rust,ignore
//! use popug_core::error::{PopugError, Result, ErrorContext, ErrorCode};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("schema.json")
//!         .with_error_code(ErrorCode::InvalidSchema)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Popug operations.
pub type Result<T> = std::result::Result<T, PopugError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// Codes are stable; operators and the CLI match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Task Errors (1000-1099)
    TaskNotFound,
    InvalidStateTransition,
    NothingToReassign,
    InvalidTaskInput,

    // Assignee Errors (1100-1199)
    EmptyAssigneePool,
    AssigneeNotFound,

    // Schema Errors (1200-1299)
    SchemaValidationFailed,
    SchemaNotFound,
    InvalidSchema,

    // Event Errors (1300-1399)
    UnknownEvent,
    MalformedEnvelope,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    DatabaseTransactionFailed,
    RecordNotFound,
    DuplicateRecord,

    // Broker Errors (2100-2199)
    BrokerError,
    BrokerConnectionFailed,
    PublishFailed,
    BrokerReadFailed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::TaskNotFound => 1000,
            Self::InvalidStateTransition => 1001,
            Self::NothingToReassign => 1002,
            Self::InvalidTaskInput => 1003,

            Self::EmptyAssigneePool => 1100,
            Self::AssigneeNotFound => 1101,

            Self::SchemaValidationFailed => 1200,
            Self::SchemaNotFound => 1201,
            Self::InvalidSchema => 1202,

            Self::UnknownEvent => 1300,
            Self::MalformedEnvelope => 1301,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::DatabaseTransactionFailed => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            Self::BrokerError => 2100,
            Self::BrokerConnectionFailed => 2101,
            Self::PublishFailed => 2102,
            Self::BrokerReadFailed => 2103,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Check if this error is retryable.
    ///
    /// An empty assignee pool is a precondition that clears once identity
    /// events arrive, so callers may retry it.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmptyAssigneePool
                | Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::DatabaseTransactionFailed
                | Self::BrokerError
                | Self::BrokerConnectionFailed
                | Self::PublishFailed
                | Self::BrokerReadFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "task",
            1100..=1199 => "assignee",
            1200..=1299 => "schema",
            1300..=1399 => "event",
            2000..=2099 => "database",
            2100..=2199 => "broker",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids, rejected events)
    Low,
    /// Expected operational conditions (empty pool, unroutable messages)
    Medium,
    /// System errors (storage or broker failures)
    High,
    /// Errors that make the service unusable
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::TaskNotFound
            | ErrorCode::AssigneeNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::InvalidStateTransition
            | ErrorCode::NothingToReassign
            | ErrorCode::InvalidTaskInput
            | ErrorCode::SchemaValidationFailed
            | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::EmptyAssigneePool
            | ErrorCode::SchemaNotFound
            | ErrorCode::UnknownEvent
            | ErrorCode::MalformedEnvelope => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::DatabaseTransactionFailed
            | ErrorCode::BrokerError
            | ErrorCode::PublishFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidSchema
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::BrokerConnectionFailed
            | ErrorCode::BrokerReadFailed
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (task, assignee, message id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Schema violations, one `path: message` entry each
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_violations(mut self, violations: Vec<String>) -> Self {
        self.violations = violations;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the Popug core.
///
/// Carries a stable code, a short message safe to show operators, an
/// optional internal message for logs, and structured details.
#[derive(Error, Debug)]
pub struct PopugError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Operator-facing message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for PopugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl PopugError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both public and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Schema violations attached to a validation failure.
    pub fn violations(&self) -> &[String] {
        &self.details.violations
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    violations = ?self.details.violations,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "popug_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with a message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error under a specific code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| PopugError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| PopugError::new(code, e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for PopugError {
    fn from(error: sqlx::Error) -> Self {
        let (code, msg) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::RecordNotFound, "The requested record was not found"),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                (ErrorCode::DatabaseConnectionFailed, "Unable to connect to the database")
            }
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for PopugError {
    fn from(error: redis::RedisError) -> Self {
        let (code, msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::BrokerConnectionFailed, "Unable to connect to the broker")
        } else if error.is_timeout() {
            (ErrorCode::BrokerError, "Broker operation timed out")
        } else {
            (ErrorCode::BrokerError, "A broker error occurred")
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for PopugError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for PopugError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::RecordNotFound, "File or resource not found"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::BrokerConnectionFailed, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for PopugError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<PopugError>() {
            Ok(popug_error) => popug_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for PopugError {
    fn from(error: config::ConfigError) -> Self {
        let (code, msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::MissingConfiguration, "Required configuration not found")
            }
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl PopugError {
    // ─────────────────────────────────────────────────────────────────────────
    // Task Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn task_not_found(task_id: uuid::Uuid) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", task_id))
            .with_details(ErrorDetails::new().with_entity("task", task_id.to_string()))
    }

    pub fn invalid_state_transition(
        task_id: uuid::Uuid,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Task {} cannot move from {} to {}", task_id, from, to),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("task", task_id.to_string())
                .with_context("from", from.to_string())
                .with_context("to", to.to_string()),
        )
    }

    pub fn invalid_task_input(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidTaskInput, format!("{} {}", field, reason))
            .with_context("field", field)
    }

    pub fn nothing_to_reassign() -> Self {
        Self::new(ErrorCode::NothingToReassign, "There are no tasks to reassign")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Assignee Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn empty_assignee_pool() -> Self {
        Self::new(
            ErrorCode::EmptyAssigneePool,
            "No assignees are known yet; retry once identity events have been consumed",
        )
    }

    pub fn assignee_not_found(assignee_id: uuid::Uuid) -> Self {
        Self::new(ErrorCode::AssigneeNotFound, format!("Assignee not found: {}", assignee_id))
            .with_details(ErrorDetails::new().with_entity("assignee", assignee_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Schema Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn schema_not_found(schema_type: &str, version: u32) -> Self {
        Self::new(
            ErrorCode::SchemaNotFound,
            format!("No schema registered for {} v{}", schema_type, version),
        )
        .with_details(ErrorDetails::new().with_entity("schema", format!("{}/{}", schema_type, version)))
    }

    pub fn schema_validation_failed(schema_type: &str, version: u32, violations: Vec<String>) -> Self {
        Self::new(
            ErrorCode::SchemaValidationFailed,
            format!(
                "{} v{} failed validation with {} violation(s)",
                schema_type,
                version,
                violations.len()
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("schema", format!("{}/{}", schema_type, version))
                .with_violations(violations),
        )
    }

    pub fn invalid_schema(schema_type: &str, version: u32, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidSchema,
            format!("Schema document for {} v{} is invalid", schema_type, version),
            reason,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn unknown_event(topic: &str, name: &str) -> Self {
        Self::new(
            ErrorCode::UnknownEvent,
            format!("No handler for event {} on topic {}", name, topic),
        )
        .with_context("topic", topic)
        .with_context("name", name)
    }

    pub fn malformed_envelope(topic: &str, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::MalformedEnvelope,
            format!("Malformed event envelope on topic {}", topic),
            reason,
        )
        .with_context("topic", topic)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Broker Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn publish_failed(topic: &str, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PublishFailed,
            format!("Failed to publish to topic {}", topic),
            reason,
        )
        .with_context("topic", topic)
    }

    pub fn broker_read_failed(reason: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::BrokerReadFailed, "Failed to read from the broker", reason)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
