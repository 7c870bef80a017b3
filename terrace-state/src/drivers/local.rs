//! Local directory driver for state storage
//!
//! Each key is stored as a file under the root directory, next to a
//! `<key>.version` sidecar holding the version token assigned on upload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::driver::{StorageConfig, StorageDriver, StorageError, StorageResult, StorageVersion};

/// Contents of a `.version` sidecar file
#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    version: String,
    last_modified: DateTime<Utc>,
}

/// Local directory driver for development and on-agent caching
pub struct LocalDriver {
    /// Directory holding stored objects
    root: PathBuf,
}

impl LocalDriver {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a LocalDriver from configuration
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let root = config.require_string("path")?;
        Ok(Self::with_root(root))
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::configuration(format!(
                "Invalid storage key: '{}'",
                key
            )));
        }
        Ok(self.root.join(relative))
    }

    fn version_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_os_string();
        name.push(".version");
        PathBuf::from(name)
    }

    async fn read_version(&self, key: &str, object_path: &Path) -> StorageResult<StorageVersion> {
        let version_path = Self::version_path(object_path);
        let content = match tokio::fs::read(&version_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StorageVersion::zero());
            }
            Err(e) => return Err(StorageError::read(key, e)),
        };

        let record: VersionRecord = serde_json::from_slice(&content)
            .map_err(|e| StorageError::read(key, format!("corrupt version record: {}", e)))?;
        Ok(StorageVersion::new(record.version, Some(record.last_modified)))
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, key: &str, content: Vec<u8>) -> StorageResult<StorageVersion> {
        let object_path = self.object_path(key)?;
        if let Some(parent) = object_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::write(key, e))?;
        }

        tokio::fs::write(&object_path, content)
            .await
            .map_err(|e| StorageError::write(key, e))?;

        let record = VersionRecord {
            version: uuid::Uuid::new_v4().to_string(),
            last_modified: Utc::now(),
        };
        let sidecar = serde_json::to_vec_pretty(&record)
            .map_err(|e| StorageError::write(key, format!("Failed to serialize version: {}", e)))?;
        tokio::fs::write(Self::version_path(&object_path), sidecar)
            .await
            .map_err(|e| StorageError::write(key, e))?;

        Ok(StorageVersion::new(record.version, Some(record.last_modified)))
    }

    async fn download(&self, key: &str) -> StorageResult<(Vec<u8>, StorageVersion)> {
        let object_path = self.object_path(key)?;
        let version = self.read_version(key, &object_path).await?;
        if version.is_zero() {
            return Err(StorageError::not_found(key));
        }

        let content = match tokio::fs::read(&object_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(key));
            }
            Err(e) => return Err(StorageError::read(key, e)),
        };
        Ok((content, version))
    }

    async fn version(&self, key: &str) -> StorageResult<StorageVersion> {
        let object_path = self.object_path(key)?;
        if !object_path.exists() {
            return Ok(StorageVersion::zero());
        }
        self.read_version(key, &object_path).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let object_path = self.object_path(key)?;
        for path in [Self::version_path(&object_path), object_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::write(key, e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_driver_round_trip() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        let before = driver.version("prod.tfstate").await.unwrap();
        assert!(before.is_zero());

        let content = br#"{"serial": 4}"#.to_vec();
        let uploaded = driver.upload("prod.tfstate", content.clone()).await.unwrap();
        assert!(!uploaded.is_zero());
        assert_ne!(uploaded, before);

        let (downloaded, version) = driver.download("prod.tfstate").await.unwrap();
        assert_eq!(downloaded, content);
        assert_eq!(version, uploaded);
        assert_eq!(driver.version("prod.tfstate").await.unwrap(), uploaded);
    }

    #[tokio::test]
    async fn test_local_driver_new_token_per_upload() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        let first = driver.upload("a.tfstate", b"1".to_vec()).await.unwrap();
        let second = driver.upload("a.tfstate", b"1".to_vec()).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_local_driver_download_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        let err = driver.download("missing.tfstate").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_driver_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        driver.upload("x.tfstate", b"{}".to_vec()).await.unwrap();
        driver.delete("x.tfstate").await.unwrap();
        assert!(driver.version("x.tfstate").await.unwrap().is_zero());

        driver.delete("x.tfstate").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_driver_nested_keys() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        driver
            .upload("envs/staging.tfstate", b"{}".to_vec())
            .await
            .unwrap();
        assert!(dir.path().join("envs/staging.tfstate").exists());
        assert!(dir.path().join("envs/staging.tfstate.version").exists());
    }

    #[tokio::test]
    async fn test_local_driver_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let driver = LocalDriver::with_root(dir.path());

        let err = driver.version("../outside.tfstate").await.unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[test]
    fn test_local_driver_from_config() {
        let config =
            StorageConfig::new("local").with_attribute("path", serde_json::json!("/var/states"));
        let driver = LocalDriver::from_config(&config).unwrap();
        assert_eq!(driver.root(), Path::new("/var/states"));

        let missing = StorageConfig::new("local");
        assert!(LocalDriver::from_config(&missing).is_err());
    }
}
