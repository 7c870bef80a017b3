//! Null driver: accepts writes and forgets them

use async_trait::async_trait;
use chrono::Utc;

use crate::driver::{StorageDriver, StorageError, StorageResult, StorageVersion};

/// Driver that stores nothing. Every probe reports the zero version.
#[derive(Debug, Default)]
pub struct NullDriver;

#[async_trait]
impl StorageDriver for NullDriver {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn upload(&self, _key: &str, _content: Vec<u8>) -> StorageResult<StorageVersion> {
        Ok(StorageVersion::new(
            uuid::Uuid::new_v4().to_string(),
            Some(Utc::now()),
        ))
    }

    async fn download(&self, key: &str) -> StorageResult<(Vec<u8>, StorageVersion)> {
        Err(StorageError::not_found(key))
    }

    async fn version(&self, _key: &str) -> StorageResult<StorageVersion> {
        Ok(StorageVersion::zero())
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }
}
