//! Schema registry for versioned events.
//!
//! Schemas are keyed by `(schema type, version)`; the schema type is the
//! event name. A schema document describes the whole envelope, so `name`,
//! `version` and `data` are validated as a unit.

pub mod document;
pub mod violation;

pub use document::SchemaNode;
pub use violation::{ViolationKind, Violations};

use serde_json::Value;
use std::collections::HashMap;
use tracing::instrument;

use crate::error::{PopugError, Result};
use crate::events::Envelope;
use crate::observability::metrics;

/// Schemas compiled into the binary: `(schema type, version, document)`.
const BUILTIN_SCHEMAS: &[(&str, u32, &str)] = &[
    ("TaskAssigned", 2, include_str!("../../schemas/TaskAssigned.v2.json")),
    ("TasksReassigned", 2, include_str!("../../schemas/TasksReassigned.v2.json")),
    ("TaskCompleted", 2, include_str!("../../schemas/TaskCompleted.v2.json")),
];

/// Registry of schema documents.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<(String, u32), SchemaNode>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry loaded with the built-in task event schemas.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for (schema_type, version, text) in BUILTIN_SCHEMAS {
            registry.register_json(schema_type, *version, text)?;
        }
        Ok(registry)
    }

    /// Register (or replace) the schema for `(schema_type, version)`.
    pub fn register(&mut self, schema_type: &str, version: u32, document: &Value) -> Result<()> {
        let node = SchemaNode::parse(document)
            .map_err(|e| PopugError::invalid_schema(schema_type, version, e.to_string()))?;
        self.schemas.insert((schema_type.to_string(), version), node);
        Ok(())
    }

    /// Register from JSON text.
    pub fn register_json(&mut self, schema_type: &str, version: u32, text: &str) -> Result<()> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| PopugError::invalid_schema(schema_type, version, e.to_string()))?;
        self.register(schema_type, version, &document)
    }

    pub fn contains(&self, schema_type: &str, version: u32) -> bool {
        self.schemas.contains_key(&(schema_type.to_string(), version))
    }

    /// Registered versions of a schema type, ascending.
    pub fn versions(&self, schema_type: &str) -> Vec<u32> {
        let mut versions: Vec<u32> = self
            .schemas
            .keys()
            .filter(|(t, _)| t == schema_type)
            .map(|(_, v)| *v)
            .collect();
        versions.sort_unstable();
        versions
    }

    /// Every registered `(schema type, version)`, sorted.
    pub fn entries(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> = self.schemas.keys().cloned().collect();
        entries.sort();
        entries
    }

    /// Structurally validate `value` against the schema for `(schema_type, version)`.
    #[instrument(skip(self, value))]
    pub fn validate(&self, value: &Value, schema_type: &str, version: u32) -> Result<()> {
        let node = self
            .schemas
            .get(&(schema_type.to_string(), version))
            .ok_or_else(|| PopugError::schema_not_found(schema_type, version))?;

        let violations = node.validate(value);
        if violations.is_empty() {
            return Ok(());
        }

        metrics::record_schema_rejection(schema_type);
        tracing::warn!(
            schema_type,
            version,
            violations = %violations,
            "Event rejected by schema"
        );
        Err(PopugError::schema_validation_failed(
            schema_type,
            version,
            violations.to_flat_messages(),
        ))
    }

    /// Validate an envelope under its own `(name, version)`.
    ///
    /// Unversioned envelopes are legacy events and pass without a lookup.
    pub fn validate_envelope(&self, envelope: &Envelope) -> Result<()> {
        match envelope.version {
            Some(version) => self.validate(&envelope.to_value()?, &envelope.name, version),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;
    use uuid::Uuid;

    fn task_envelope(name: &str, version: u32) -> Envelope {
        Envelope::new(
            name,
            Some(version),
            json!({
                "id": Uuid::new_v4(),
                "title": "clean the cage",
                "jira_id": "POPUG-1",
                "assignee_id": Uuid::new_v4(),
            }),
        )
    }

    #[test]
    fn test_builtin_registers_task_schemas() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.contains("TaskAssigned", 2));
        assert!(registry.contains("TasksReassigned", 2));
        assert!(registry.contains("TaskCompleted", 2));
        assert_eq!(registry.versions("TaskAssigned"), vec![2]);
        assert!(registry.versions("UserCreated").is_empty());
    }

    #[test]
    fn test_valid_event_passes() {
        let registry = SchemaRegistry::builtin().unwrap();
        registry.validate_envelope(&task_envelope("TaskAssigned", 2)).unwrap();
    }

    #[test]
    fn test_unregistered_version_is_schema_not_found() {
        let registry = SchemaRegistry::builtin().unwrap();
        let err = registry.validate_envelope(&task_envelope("TaskAssigned", 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaNotFound);
    }

    #[test]
    fn test_missing_field_lists_violation() {
        let registry = SchemaRegistry::builtin().unwrap();
        let mut env = task_envelope("TaskCompleted", 2);
        env.data.as_object_mut().unwrap().remove("assignee_id");

        let err = registry.validate_envelope(&env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
        assert_eq!(err.violations(), ["data.assignee_id: field is required"]);
    }

    #[test]
    fn test_name_must_match_schema_type() {
        let registry = SchemaRegistry::builtin().unwrap();
        let env = task_envelope("TaskCompleted", 2);
        let err = registry.validate(&env.to_value().unwrap(), "TaskAssigned", 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
        assert!(err.violations()[0].starts_with("name:"));
    }

    #[test]
    fn test_validation_is_structural_only() {
        // any well-formed uuid passes; the registry does not know which assignees exist
        let registry = SchemaRegistry::builtin().unwrap();
        registry.validate_envelope(&task_envelope("TasksReassigned", 2)).unwrap();
    }

    #[test]
    fn test_unversioned_envelope_bypasses_validation() {
        let registry = SchemaRegistry::new();
        let env = Envelope::new("UserCreated", None, json!({"anything": true}));
        registry.validate_envelope(&env).unwrap();
    }

    #[test]
    fn test_register_rejects_malformed_document() {
        let mut registry = SchemaRegistry::new();
        let err = registry.register("Broken", 1, &json!({"type": 12})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSchema);
        assert!(!registry.contains("Broken", 1));
    }

    #[test]
    fn test_entries_sorted() {
        let registry = SchemaRegistry::builtin().unwrap();
        let names: Vec<String> = registry.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["TaskAssigned", "TaskCompleted", "TasksReassigned"]);
    }
}
