//! Action results and output views

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Replacement text for outputs flagged sensitive
pub const SENSITIVE_MARKER: &str = "<sensitive>";

/// One output as reported by the provisioning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub sensitive: bool,
}

impl OutputRecord {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            sensitive: false,
        }
    }

    pub fn sensitive(value: serde_json::Value) -> Self {
        Self {
            value,
            sensitive: true,
        }
    }
}

/// Outputs keyed by name
pub type Outputs = BTreeMap<String, OutputRecord>;

/// Result of an apply, destroy or read
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub version: Version,
    pub output: Outputs,
}

impl ActionResult {
    pub fn new(version: Version, output: Outputs) -> Self {
        Self { version, output }
    }

    /// Result carrying a version and no outputs (destroy, missing state)
    pub fn without_output(version: Version) -> Self {
        Self::new(version, Outputs::new())
    }

    /// Output name to raw value, for machine consumption
    pub fn raw_output(&self) -> BTreeMap<String, serde_json::Value> {
        self.output
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect()
    }

    /// Output name to display string with sensitive values redacted.
    ///
    /// A value that cannot be rendered degrades to a message for that key
    /// only.
    pub fn sanitized_output(&self) -> BTreeMap<String, String> {
        self.output
            .iter()
            .map(|(key, record)| {
                let display = if record.sensitive {
                    SENSITIVE_MARKER.to_string()
                } else {
                    render_value(&record.value).unwrap_or_else(|e| {
                        format!("Unable to parse output value for key '{}': {}", key, e)
                    })
                };
                (key.clone(), display)
            })
            .collect()
    }
}

/// Canonical text of a value; scalar strings lose their quotes
fn render_value(value: &serde_json::Value) -> serde_json::Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other),
    }
}
