//! Schema violation types with path-level error support.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Violation Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// The kind of structural violation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Property is required but missing.
    Required,
    /// Value has the wrong JSON type.
    TypeMismatch { expected: String, actual: String },
    /// String is shorter than allowed.
    MinLength { min: usize, actual: usize },
    /// String is not a UUID.
    InvalidUuid,
    /// Value is not in the allowed set.
    NotInSet { allowed: Vec<String> },
    /// Property is not declared and additional properties are closed.
    UnexpectedProperty,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "field is required"),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "expected {} (got {})", expected, actual)
            }
            Self::MinLength { min, actual } => {
                write!(f, "must be at least {} characters (got {})", min, actual)
            }
            Self::InvalidUuid => write!(f, "must be a valid UUID"),
            Self::NotInSet { allowed } => write!(f, "must be one of: {}", allowed.join(", ")),
            Self::UnexpectedProperty => write!(f, "property is not allowed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Violations Collection
// ═══════════════════════════════════════════════════════════════════════════════

/// Violations organized by JSON path (e.g. `data.assignee_id`).
///
/// Paths are kept sorted so reports are stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Violations {
    #[serde(flatten)]
    errors: BTreeMap<String, Vec<ViolationKind>>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of violations across all paths.
    pub fn count(&self) -> usize {
        self.errors.values().map(|v| v.len()).sum()
    }

    pub fn add(&mut self, path: impl Into<String>, kind: ViolationKind) {
        self.errors.entry(path.into()).or_default().push(kind);
    }

    pub fn get(&self, path: &str) -> Option<&Vec<ViolationKind>> {
        self.errors.get(path)
    }

    pub fn has_errors(&self, path: &str) -> bool {
        self.errors.get(path).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Flat `path: message` list, the form carried by `PopugError`.
    pub fn to_flat_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flat_map(|(path, kinds)| kinds.iter().map(move |k| format!("{}: {}", path, k)))
            .collect()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_flat_messages().join("; "))
    }
}

/// Join a parent path and a property name.
pub(crate) fn child_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}
