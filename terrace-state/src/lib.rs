//! Terrace State Storage
//!
//! This crate provides versioned remote storage for deployment state
//! produced by the terrace pipeline resource. It supports storing state
//! blobs in S3-compatible object storage, a local directory, or nowhere
//! at all (the null driver).
//!
//! # Overview
//!
//! - **StorageDriver**: A trait for versioned key/blob stores
//! - **StorageVersion**: The opaque token a store assigns on every write
//! - **StateFile**: A local file paired with a remote key
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use terrace_state::{build_driver, scratch_dir, StateFile, StorageConfig};
//!
//! let config: StorageConfig = serde_json::from_str(r#"{"driver": "s3", "bucket": "states"}"#)?;
//! let driver = Arc::from(build_driver(&config).await?);
//!
//! let scratch = scratch_dir()?;
//! let state_file = StateFile::for_env("staging", scratch.path(), driver);
//!
//! // Zero version means no state has been stored for this environment yet
//! let version = state_file.download().await?;
//!
//! // ... run the provisioning engine against state_file.local_path() ...
//!
//! let new_version = state_file.upload().await?;
//! ```

pub mod driver;
pub mod drivers;
pub mod state_file;

// Re-export main types for convenience
pub use driver::{StorageConfig, StorageDriver, StorageError, StorageResult, StorageVersion};
pub use drivers::build_driver;
pub use state_file::{StateFile, scratch_dir, state_key};
