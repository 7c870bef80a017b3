//! Terrace Core
//!
//! State lifecycle orchestration for the terrace pipeline resource: apply
//! and destroy an environment through the provisioning engine, persist the
//! resulting state, and report a version identity the pipeline can compare.
//!
//! State lives either in a backend-managed workspace (identified by the
//! state serial) or in a versioned blob store (identified by the storage
//! version token). Both produce the same `ActionResult` shape.

pub mod action;
pub mod client;
pub mod error;
pub mod output;
pub mod request;
pub mod terraform;
pub mod version;

pub use action::{Action, StateBackend, parse_serial};
pub use client::ProvisioningClient;
pub use error::{Error, Result};
pub use output::{ActionResult, OutputRecord, Outputs, SENSITIVE_MARKER};
pub use request::{ActionKind, MetadataField, Params, Request, Response, Settings, Source};
pub use terraform::{TerraformClient, TerraformConfig};
pub use version::{Mode, Version};
