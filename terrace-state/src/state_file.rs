//! Local copy of a remote state object

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::driver::{StorageDriver, StorageError, StorageResult, StorageVersion};

/// Build the remote key for an environment's state (`<env>.tfstate`)
pub fn state_key(env_name: &str) -> String {
    format!("{}.tfstate", env_name)
}

/// Create the per-invocation scratch directory.
///
/// The directory and everything in it is removed when the returned
/// `TempDir` is dropped, on success, error and unwind alike.
pub fn scratch_dir() -> StorageResult<TempDir> {
    tempfile::Builder::new()
        .prefix("terrace-")
        .tempdir()
        .map_err(|e| StorageError::Io(format!("Failed to create scratch directory: {}", e)))
}

/// Pairs a local file with a remote key in a storage driver
#[derive(Clone)]
pub struct StateFile {
    local_path: PathBuf,
    remote_path: String,
    driver: Arc<dyn StorageDriver>,
}

impl StateFile {
    /// File name of the local copy inside the scratch directory
    pub const LOCAL_FILE_NAME: &'static str = "terraform.tfstate";

    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        driver: Arc<dyn StorageDriver>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            driver,
        }
    }

    /// State file for an environment, stored locally under `dir`
    pub fn for_env(env_name: &str, dir: &Path, driver: Arc<dyn StorageDriver>) -> Self {
        Self::new(dir.join(Self::LOCAL_FILE_NAME), state_key(env_name), driver)
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn exists_locally(&self) -> bool {
        self.local_path.is_file()
    }

    /// Probe the remote version without downloading
    pub async fn remote_version(&self) -> StorageResult<StorageVersion> {
        self.driver.version(&self.remote_path).await
    }

    /// Download the remote object to the local path.
    ///
    /// Returns the zero version without error when the remote object does
    /// not exist; whether that is fatal is the caller's decision.
    pub async fn download(&self) -> StorageResult<StorageVersion> {
        let version = self.remote_version().await?;
        if version.is_zero() {
            log::debug!("No remote state at '{}'", self.remote_path);
            return Ok(version);
        }

        let (content, version) = self.driver.download(&self.remote_path).await?;
        if let Some(parent) = self.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        tokio::fs::write(&self.local_path, content).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to write state file to '{}': {}",
                self.local_path.display(),
                e
            ))
        })?;

        log::info!(
            "Downloaded state '{}' (version {})",
            self.remote_path,
            version
        );
        Ok(version)
    }

    /// Upload the local file to the remote key, returning the new version
    pub async fn upload(&self) -> StorageResult<StorageVersion> {
        let content = self.read_local().await?;
        let version = self.driver.upload(&self.remote_path, content).await?;
        log::info!("Uploaded state '{}' (version {})", self.remote_path, version);
        Ok(version)
    }

    /// Remove the remote object; no-op if it is already absent
    pub async fn delete(&self) -> StorageResult<()> {
        self.driver.delete(&self.remote_path).await?;
        log::info!("Deleted state '{}'", self.remote_path);
        Ok(())
    }

    /// Read the local copy
    pub async fn read_local(&self) -> StorageResult<Vec<u8>> {
        tokio::fs::read(&self.local_path).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to read state file '{}': {}",
                self.local_path.display(),
                e
            ))
        })
    }
}

impl std::fmt::Debug for StateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFile")
            .field("local_path", &self.local_path)
            .field("remote_path", &self.remote_path)
            .field("driver", &self.driver.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::LocalDriver;
    use tempfile::tempdir;

    fn local_driver(root: &Path) -> Arc<dyn StorageDriver> {
        Arc::new(LocalDriver::with_root(root))
    }

    #[test]
    fn test_state_key() {
        assert_eq!(state_key("staging"), "staging.tfstate");
    }

    #[tokio::test]
    async fn test_download_missing_returns_zero() {
        let store = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let state_file = StateFile::for_env("prod", scratch.path(), local_driver(store.path()));

        let version = state_file.download().await.unwrap();
        assert!(version.is_zero());
        assert!(!state_file.exists_locally());
    }

    #[tokio::test]
    async fn test_upload_then_download_is_byte_identical() {
        let store = tempdir().unwrap();
        let driver = local_driver(store.path());

        let writer_dir = tempdir().unwrap();
        let writer = StateFile::for_env("prod", writer_dir.path(), driver.clone());
        let before = writer.remote_version().await.unwrap();

        let content = br#"{"version": 4, "serial": 12, "resources": []}"#;
        std::fs::write(writer.local_path(), content).unwrap();
        let uploaded = writer.upload().await.unwrap();
        assert!(!uploaded.is_zero());
        assert_ne!(uploaded, before);

        let reader_dir = tempdir().unwrap();
        let reader = StateFile::for_env("prod", reader_dir.path(), driver);
        let downloaded = reader.download().await.unwrap();
        assert_eq!(downloaded, uploaded);
        assert_eq!(std::fs::read(reader.local_path()).unwrap(), content);
    }

    #[tokio::test]
    async fn test_upload_without_local_file_fails() {
        let store = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let state_file = StateFile::for_env("prod", scratch.path(), local_driver(store.path()));

        let err = state_file.upload().await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_remote() {
        let store = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let state_file = StateFile::for_env("prod", scratch.path(), local_driver(store.path()));

        std::fs::write(state_file.local_path(), b"{}").unwrap();
        state_file.upload().await.unwrap();
        state_file.delete().await.unwrap();
        assert!(state_file.remote_version().await.unwrap().is_zero());
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let dir = scratch_dir().unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join(StateFile::LOCAL_FILE_NAME), b"{}").unwrap();
        assert!(path.exists());

        drop(dir);
        assert!(!path.exists());
    }
}
