//! Command and result messages.
//!
//! Commands cross the C boundary as JSON text; the bridge only needs a name
//! and an opaque property bag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
}

/// A command delivered to an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    pub name: String,

    #[serde(default)]
    pub properties: Value,
}

impl Cmd {
    /// Create a command without properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Value::Null,
        }
    }

    /// Attach properties.
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Parse a command from its JSON carrier.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// The result of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdResult {
    pub status_code: StatusCode,
    pub cmd_name: String,

    #[serde(default = "default_is_final")]
    pub is_final: bool,

    #[serde(default)]
    pub properties: Value,
}

fn default_is_final() -> bool {
    true
}

impl CmdResult {
    /// Create a final result answering `cmd`.
    pub fn new(status_code: StatusCode, cmd: &Cmd) -> Self {
        Self {
            status_code,
            cmd_name: cmd.name.clone(),
            is_final: true,
            properties: Value::Null,
        }
    }

    /// Error result for a command that could not be decoded.
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::Error,
            cmd_name: String::new(),
            is_final: true,
            properties: serde_json::json!({ "detail": detail.into() }),
        }
    }

    /// Attach properties.
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Mark the result as intermediate (more results follow).
    pub fn streaming(mut self) -> Self {
        self.is_final = false;
        self
    }

    /// Serialize to the JSON carrier.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings, bools and a `Value` cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
