//! Schema documents and the structural validator.
//!
//! Supports the JSON-Schema subset the event contract uses: `type` (single or
//! list), `properties`, `required`, `additionalProperties` (boolean),
//! `enum`, `items`, `minLength` and `format: "uuid"`. Unrecognised keywords
//! (`$schema`, `title`, `description`) are ignored.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::violation::{child_path, ViolationKind, Violations};

/// JSON types a schema node can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl JsonType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
            JsonType::String => value.is_string(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Number => value.is_number(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Null => value.is_null(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Null => "null",
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeSet {
    One(JsonType),
    Many(Vec<JsonType>),
}

impl TypeSet {
    fn as_slice(&self) -> &[JsonType] {
        match self {
            TypeSet::One(t) => std::slice::from_ref(t),
            TypeSet::Many(ts) => ts,
        }
    }
}

/// One node of a parsed schema document.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaNode {
    #[serde(rename = "type")]
    types: Option<TypeSet>,

    #[serde(default)]
    properties: BTreeMap<String, SchemaNode>,

    #[serde(default)]
    required: Vec<String>,

    #[serde(rename = "additionalProperties", default = "open")]
    additional_properties: bool,

    #[serde(rename = "enum")]
    allowed: Option<Vec<Value>>,

    items: Option<Box<SchemaNode>>,

    #[serde(rename = "minLength")]
    min_length: Option<usize>,

    format: Option<String>,
}

fn open() -> bool {
    true
}

impl SchemaNode {
    /// Parse a schema document.
    pub fn parse(document: &Value) -> Result<Self, serde_json::Error> {
        SchemaNode::deserialize(document)
    }

    /// Validate `value`, collecting every violation rather than stopping at the first.
    pub fn validate(&self, value: &Value) -> Violations {
        let mut violations = Violations::new();
        self.check(value, "", &mut violations);
        violations
    }

    fn check(&self, value: &Value, path: &str, out: &mut Violations) {
        if let Some(types) = &self.types {
            let types = types.as_slice();
            if !types.iter().any(|t| t.matches(value)) {
                let expected = types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" or ");
                out.add(
                    path,
                    ViolationKind::TypeMismatch {
                        expected,
                        actual: describe(value).to_string(),
                    },
                );
                return;
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                out.add(
                    path,
                    ViolationKind::NotInSet {
                        allowed: allowed.iter().map(|v| v.to_string()).collect(),
                    },
                );
            }
        }

        match value {
            Value::String(s) => {
                if let Some(min) = self.min_length {
                    let actual = s.chars().count();
                    if actual < min {
                        out.add(path, ViolationKind::MinLength { min, actual });
                    }
                }
                if self.format.as_deref() == Some("uuid") && uuid::Uuid::parse_str(s).is_err() {
                    out.add(path, ViolationKind::InvalidUuid);
                }
            }
            Value::Object(map) => {
                for field in &self.required {
                    if !map.contains_key(field) {
                        out.add(child_path(path, field), ViolationKind::Required);
                    }
                }
                for (key, child) in map {
                    match self.properties.get(key) {
                        Some(node) => node.check(child, &child_path(path, key), out),
                        None if !self.additional_properties => {
                            out.add(child_path(path, key), ViolationKind::UnexpectedProperty);
                        }
                        None => {}
                    }
                }
            }
            Value::Array(items) => {
                if let Some(node) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        node.check(item, &format!("{}[{}]", path, i), out);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(doc: Value) -> SchemaNode {
        SchemaNode::parse(&doc).unwrap()
    }

    #[test]
    fn test_type_mismatch_stops_descent() {
        let schema = node(json!({"type": "object", "required": ["a"]}));
        let v = schema.validate(&json!("text"));
        assert_eq!(v.count(), 1);
        assert!(v.has_errors(""));
    }

    #[test]
    fn test_required_and_unexpected() {
        let schema = node(json!({
            "type": "object",
            "required": ["id"],
            "additionalProperties": false,
            "properties": {"id": {"type": "string"}}
        }));
        let v = schema.validate(&json!({"extra": 1}));
        assert!(v.has_errors("id"));
        assert!(v.has_errors("extra"));
    }

    #[test]
    fn test_integer_rejects_float() {
        let schema = node(json!({"type": "integer"}));
        assert!(!schema.validate(&json!(2.5)).is_empty());
        assert!(schema.validate(&json!(2)).is_empty());
    }

    #[test]
    fn test_type_list() {
        let schema = node(json!({"type": ["string", "null"]}));
        assert!(schema.validate(&json!(null)).is_empty());
        assert!(schema.validate(&json!("x")).is_empty());
        assert!(!schema.validate(&json!(1)).is_empty());
    }

    #[test]
    fn test_array_items_paths() {
        let schema = node(json!({"type": "array", "items": {"type": "string", "format": "uuid"}}));
        let v = schema.validate(&json!([uuid::Uuid::new_v4().to_string(), "nope"]));
        assert!(v.has_errors("[1]"));
        assert_eq!(v.count(), 1);
    }

    #[test]
    fn test_unknown_keywords_ignored() {
        let schema = node(json!({"$schema": "x", "title": "t", "description": "d", "type": "string"}));
        assert!(schema.validate(&json!("ok")).is_empty());
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(SchemaNode::parse(&json!({"type": "widget"})).is_err());
        assert!(SchemaNode::parse(&json!({"required": "id"})).is_err());
    }
}
