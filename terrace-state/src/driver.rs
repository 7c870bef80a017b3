//! Storage driver trait, version tokens and error types

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with a storage driver
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist in the store
    #[error("Key not found in storage: {0}")]
    NotFound(String),

    /// The driver type is not supported
    #[error("Unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    /// Configuration error
    #[error("Storage configuration error: {0}")]
    Configuration(String),

    /// Failed to read an object or its metadata
    #[error("Failed to read '{key}' from storage: {message}")]
    Read { key: String, message: String },

    /// Failed to write or delete an object
    #[error("Failed to write '{key}' to storage: {message}")]
    Write { key: String, message: String },

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn read(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Read {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn write(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Write {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unsupported_driver(driver: impl Into<String>) -> Self {
        Self::UnsupportedDriver(driver.into())
    }

    /// Returns true if this error means the key is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Opaque version of one stored object, assigned by the store on write.
///
/// An empty token is the zero version: the object does not exist.
/// Tokens are compared for equality only, never for magnitude.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageVersion {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl StorageVersion {
    pub fn new(token: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            last_modified,
        }
    }

    /// The version reported for a key that does not exist
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.token.is_empty()
    }
}

impl PartialEq for StorageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for StorageVersion {}

impl std::fmt::Display for StorageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_zero() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.token)
        }
    }
}

/// Versioned key/blob store.
///
/// Absence is asymmetric on purpose: `version` reports a missing key as the
/// zero version, while `download` fails with `StorageError::NotFound`.
/// Every driver must preserve this.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name (e.g., "s3")
    fn name(&self) -> &'static str;

    /// Write content under key and return the version assigned by the store
    async fn upload(&self, key: &str, content: Vec<u8>) -> StorageResult<StorageVersion>;

    /// Read content under key together with its current version
    ///
    /// Fails with `StorageError::NotFound` if the key does not exist
    async fn download(&self, key: &str) -> StorageResult<(Vec<u8>, StorageVersion)>;

    /// Probe the current version of key
    ///
    /// Returns `StorageVersion::zero()` if the key does not exist
    async fn version(&self, key: &str) -> StorageResult<StorageVersion>;

    /// Remove key; no-op if it is already absent
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Configuration for a storage driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver type ("s3", "local", "null"); defaults to "s3"
    #[serde(default)]
    pub driver: Option<String>,
    /// Driver-specific attributes
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl StorageConfig {
    pub const DEFAULT_DRIVER: &'static str = "s3";

    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: Some(driver.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn driver_name(&self) -> &str {
        self.driver.as_deref().unwrap_or(Self::DEFAULT_DRIVER)
    }

    /// Get a string attribute value; empty strings count as unset
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a required string attribute value
    pub fn require_string(&self, key: &str) -> StorageResult<&str> {
        self.get_string(key).ok_or_else(|| {
            StorageError::configuration(format!(
                "Missing required attribute for {} driver: {}",
                self.driver_name(),
                key
            ))
        })
    }

    /// Get a boolean attribute value, accepting "true"/"false" strings
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(serde_json::Value::Bool(b)) => Some(*b),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}
