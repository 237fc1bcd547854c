//! The wire envelope shared by every event.

use serde::{Deserialize, Serialize};

use crate::error::{PopugError, Result};

/// `{name, version?, data}` wrapper around an event payload.
///
/// `version` is present for schema-validated event types and absent for
/// legacy ones; it is omitted from the wire form when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag
    pub name: String,

    /// Schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Event-specific payload
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(name: impl Into<String>, version: Option<u32>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            version,
            data,
        }
    }

    /// Serialize for the broker.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a broker payload received on `topic`.
    pub fn decode(topic: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| PopugError::malformed_envelope(topic, e.to_string()))
    }

    /// Envelope as a JSON value, the form the schema registry validates.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
