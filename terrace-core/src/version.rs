//! Version identity of one environment's persisted state

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use terrace_state::StorageVersion;

use crate::error::{Error, Result};

/// How state for an environment is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Backend-managed workspace, identified by the state serial
    Workspace,
    /// Externally versioned blob, identified by the storage version token
    Legacy,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Workspace => write!(f, "workspace"),
            Mode::Legacy => write!(f, "legacy"),
        }
    }
}

/// Identifies one persisted state for one environment.
///
/// At most one of `serial` and `storage_version` is set. Neither set means
/// no state exists yet. Serialized as a string map, since pipeline versions
/// carry string values only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Version {
    pub env_name: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_serial",
        deserialize_with = "deserialize_serial"
    )]
    pub serial: Option<u64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_non_empty"
    )]
    pub storage_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "is_false",
        serialize_with = "serialize_flag",
        deserialize_with = "deserialize_flag"
    )]
    pub plan_only: bool,
}

impl Version {
    /// Identity for an environment with no state
    pub fn empty(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            ..Self::default()
        }
    }

    /// Zero identity for a plan-only read of a missing environment
    pub fn plan(env_name: impl Into<String>) -> Self {
        Self {
            plan_only: true,
            ..Self::empty(env_name)
        }
    }

    /// Workspace-mode identity
    pub fn from_serial(env_name: impl Into<String>, serial: u64) -> Self {
        Self {
            serial: Some(serial),
            ..Self::empty(env_name)
        }
    }

    /// Legacy-mode identity; the zero storage version yields an empty identity
    pub fn from_storage(env_name: impl Into<String>, version: &StorageVersion) -> Self {
        if version.is_zero() {
            return Self::empty(env_name);
        }
        Self {
            storage_version: Some(version.token.clone()),
            last_modified: version.last_modified,
            ..Self::empty(env_name)
        }
    }

    /// True if no real state is represented
    pub fn is_zero(&self) -> bool {
        self.serial.is_none() && self.storage_version.is_none()
    }

    pub fn is_plan(&self) -> bool {
        self.plan_only
    }

    /// Persistence mode that produced this identity, if any
    pub fn mode(&self) -> Option<Mode> {
        match (self.serial, &self.storage_version) {
            (Some(_), _) => Some(Mode::Workspace),
            (None, Some(_)) => Some(Mode::Legacy),
            (None, None) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.env_name.trim().is_empty() {
            return Err(Error::validation("version is missing `env_name`"));
        }
        if self.serial.is_some() && self.storage_version.is_some() {
            return Err(Error::validation(
                "version must not set both `serial` and `storage_version`",
            ));
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.env_name == other.env_name
            && self.serial == other.serial
            && self.storage_version == other.storage_version
    }
}

impl Eq for Version {}

/// Ordered only by serial within one environment. Storage tokens are opaque,
/// so two legacy identities are either equal or unordered.
impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        if self.env_name != other.env_name {
            return None;
        }
        match (self.serial, other.serial) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.serial, &self.storage_version) {
            (Some(serial), _) => write!(f, "{} (serial {})", self.env_name, serial),
            (None, Some(token)) => write!(f, "{} (version {})", self.env_name, token),
            (None, None) => write!(f, "{} (no state)", self.env_name),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts `"7"` and `7`
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(u64),
    Bool(bool),
    Text(String),
}

fn serialize_serial<S: Serializer>(
    serial: &Option<u64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match serial {
        Some(serial) => serializer.serialize_str(&serial.to_string()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_serial<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Number(n)) => Ok(Some(n)),
        Some(Scalar::Text(s)) if s.is_empty() => Ok(None),
        Some(Scalar::Text(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid serial '{}'", s))),
        Some(Scalar::Bool(b)) => Err(serde::de::Error::custom(format!(
            "invalid serial '{}'",
            b
        ))),
    }
}

fn deserialize_non_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

fn serialize_flag<S: Serializer>(
    flag: &bool,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "true" } else { "false" })
}

fn deserialize_flag<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<bool, D::Error> {
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Scalar::Bool(b)) => Ok(b),
        Some(Scalar::Text(s)) => Ok(s == "true"),
        Some(Scalar::Number(n)) => Ok(n != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_version_is_zero() {
        let version = Version::empty("staging");
        assert!(version.is_zero());
        assert_eq!(version.mode(), None);
        assert!(Version::plan("staging").is_zero());
    }

    #[test]
    fn test_from_storage() {
        let version = Version::from_storage("staging", &StorageVersion::new("abc", None));
        assert!(!version.is_zero());
        assert_eq!(version.mode(), Some(Mode::Legacy));

        let zero = Version::from_storage("staging", &StorageVersion::zero());
        assert!(zero.is_zero());
    }

    #[test]
    fn test_equality_by_env_and_identity() {
        assert_eq!(Version::from_serial("a", 3), Version::from_serial("a", 3));
        assert_ne!(Version::from_serial("a", 3), Version::from_serial("b", 3));
        assert_ne!(Version::from_serial("a", 3), Version::from_serial("a", 4));

        let mut with_time = Version::from_storage("a", &StorageVersion::new("t1", Some(Utc::now())));
        with_time.plan_only = true;
        let without_time = Version::from_storage("a", &StorageVersion::new("t1", None));
        assert_eq!(with_time, without_time);
    }

    #[test]
    fn test_ordering() {
        assert!(Version::from_serial("a", 3) < Version::from_serial("a", 4));
        assert_eq!(
            Version::from_serial("a", 3).partial_cmp(&Version::from_serial("b", 4)),
            None
        );

        let t1 = Version::from_storage("a", &StorageVersion::new("t1", None));
        let t2 = Version::from_storage("a", &StorageVersion::new("t2", None));
        assert_eq!(t1.partial_cmp(&t2), None);
        assert_eq!(t1.partial_cmp(&t1.clone()), Some(Ordering::Equal));
    }

    #[test]
    fn test_validate() {
        assert!(Version::from_serial("a", 1).validate().is_ok());
        assert!(Version::empty("").validate().is_err());

        let mut both = Version::from_serial("a", 1);
        both.storage_version = Some("t".to_string());
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_serializes_as_string_map() {
        let value = serde_json::to_value(Version::from_serial("prod", 7)).unwrap();
        assert_eq!(value, json!({"env_name": "prod", "serial": "7"}));

        let value = serde_json::to_value(Version::plan("prod")).unwrap();
        assert_eq!(value, json!({"env_name": "prod", "plan_only": "true"}));
    }

    #[test]
    fn test_deserializes_string_and_number_serial() {
        let version: Version =
            serde_json::from_value(json!({"env_name": "prod", "serial": "12"})).unwrap();
        assert_eq!(version.serial, Some(12));

        let version: Version =
            serde_json::from_value(json!({"env_name": "prod", "serial": 12})).unwrap();
        assert_eq!(version.serial, Some(12));

        let version: Version = serde_json::from_value(
            json!({"env_name": "prod", "serial": "", "storage_version": "", "plan_only": "true"}),
        )
        .unwrap();
        assert!(version.is_zero());
        assert!(version.is_plan());

        let result: std::result::Result<Version, _> =
            serde_json::from_value(json!({"env_name": "prod", "serial": "abc"}));
        assert!(result.is_err());
    }
}
