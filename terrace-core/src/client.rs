//! ProvisioningClient - Trait abstracting the infrastructure engine
//!
//! Every operation is a separate invocation of the engine and may fail
//! with `Error::ExternalTool` carrying the engine's own output.

use async_trait::async_trait;

use crate::error::Result;
use crate::output::Outputs;

/// Workspace that always exists and cannot be deleted
pub const DEFAULT_WORKSPACE: &str = "default";

/// Capability interface over the external provisioning engine.
///
/// Workspace operations only apply to workspace mode; in legacy mode the
/// engine works against a local state file instead.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Initialize the working directory against the configured remote backend
    ///
    /// Must be called before any workspace operation
    async fn init_with_backend(&self, env_name: &str) -> Result<()>;

    /// Initialize the working directory without a backend (legacy mode)
    async fn init(&self) -> Result<()>;

    /// Names of existing workspaces (case-sensitive)
    async fn workspace_list(&self) -> Result<Vec<String>>;

    /// Create a workspace
    ///
    /// Fails with `Error::WorkspaceRace` if the name already exists
    async fn workspace_new(&self, name: &str) -> Result<()>;

    /// Delete an empty workspace
    async fn workspace_delete(&self, name: &str) -> Result<()>;

    /// Create or update infrastructure for the environment
    ///
    /// Non-idempotent; may partially succeed before returning an error
    async fn apply(&self, env_name: &str) -> Result<()>;

    /// Destroy all infrastructure for the environment
    async fn destroy(&self, env_name: &str) -> Result<()>;

    /// Raw serialized state document
    async fn state_pull(&self, env_name: &str) -> Result<Vec<u8>>;

    /// Resource addresses currently tracked in state
    async fn state_list(&self, env_name: &str) -> Result<Vec<String>>;

    /// Adopt an existing resource into state at the given address
    async fn import(&self, env_name: &str, address: &str, id: &str) -> Result<()>;

    /// Current outputs
    async fn output(&self, env_name: &str) -> Result<Outputs>;

    /// Version string of the engine itself
    async fn version(&self) -> Result<String>;
}
