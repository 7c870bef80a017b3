//! Driver implementations for state storage

mod local;
mod null;
mod s3;

pub use local::LocalDriver;
pub use null::NullDriver;
pub use s3::S3Driver;

use crate::driver::{StorageConfig, StorageDriver, StorageError, StorageResult};

/// Create a driver from configuration
///
/// This function dispatches to the appropriate driver implementation
/// based on the driver name in the configuration.
pub async fn build_driver(config: &StorageConfig) -> StorageResult<Box<dyn StorageDriver>> {
    match config.driver_name() {
        "s3" => {
            let driver = S3Driver::from_config(config).await?;
            Ok(Box::new(driver))
        }
        "local" => Ok(Box::new(LocalDriver::from_config(config)?)),
        "null" => Ok(Box::new(NullDriver)),
        other => Err(StorageError::unsupported_driver(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_driver() {
        let config = StorageConfig::new("gcs");

        let result = build_driver(&config).await;
        assert!(result.is_err());

        if let Err(StorageError::UnsupportedDriver(name)) = result {
            assert_eq!(name, "gcs");
        } else {
            panic!("Expected UnsupportedDriver error");
        }
    }

    #[tokio::test]
    async fn test_build_local_and_null_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new("local")
            .with_attribute("path", serde_json::json!(dir.path().to_string_lossy()));
        let driver = build_driver(&config).await.unwrap();
        assert_eq!(driver.name(), "local");

        let driver = build_driver(&StorageConfig::new("null")).await.unwrap();
        assert_eq!(driver.name(), "null");
    }
}
