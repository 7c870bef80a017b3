//! Action - Apply/destroy orchestration with compensating rollback
//!
//! An Action drives the provisioning engine for one environment. State is
//! persisted either in a backend-managed workspace or as an externally
//! versioned blob; the choice is made once per request through
//! `StateBackend` and both produce the same `ActionResult` shape.
//!
//! Apply: setup -> ensure state -> apply -> finalize, with an optional
//! single compensating destroy when the apply step fails. Destroy: engine
//! destroy -> workspace/blob removal. Nothing is retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use terrace_state::StateFile;

use crate::client::{DEFAULT_WORKSPACE, ProvisioningClient};
use crate::error::{Error, Result};
use crate::output::ActionResult;
use crate::version::{Mode, Version};

/// Where an environment's state lives
#[derive(Debug, Clone)]
pub enum StateBackend {
    /// Backend-managed workspace named after the environment
    Workspace,
    /// Blob in a storage driver, staged through a local file
    Legacy(StateFile),
}

impl StateBackend {
    pub fn mode(&self) -> Mode {
        match self {
            StateBackend::Workspace => Mode::Workspace,
            StateBackend::Legacy(_) => Mode::Legacy,
        }
    }
}

/// Orchestrates apply/destroy/read for one environment.
///
/// Not safe to run concurrently for the same environment: workspace
/// creation and state upload are check-then-act without a lock, so callers
/// must serialize runs per environment.
pub struct Action {
    client: Arc<dyn ProvisioningClient>,
    backend: StateBackend,
    env_name: String,
    delete_on_failure: bool,
    /// Resource address -> provider id
    imports: BTreeMap<String, String>,
}

impl Action {
    pub fn new(
        client: Arc<dyn ProvisioningClient>,
        backend: StateBackend,
        env_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            backend,
            env_name: env_name.into(),
            delete_on_failure: false,
            imports: BTreeMap::new(),
        }
    }

    /// Destroy partially created resources when apply fails
    pub fn with_delete_on_failure(mut self, delete_on_failure: bool) -> Self {
        self.delete_on_failure = delete_on_failure;
        self
    }

    pub fn with_imports(mut self, imports: BTreeMap<String, String>) -> Self {
        self.imports = imports;
        self
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn mode(&self) -> Mode {
        self.backend.mode()
    }

    fn validate(&self) -> Result<()> {
        if self.env_name.trim().is_empty() {
            return Err(Error::validation("env_name must not be empty"));
        }
        Ok(())
    }

    /// Create or update the environment
    pub async fn apply(&self) -> Result<ActionResult> {
        self.validate()?;
        self.setup().await?;

        log::info!("== Terraform Apply: {} ==", self.env_name);
        let err = match self.attempt_apply().await {
            Ok(result) => {
                log::info!("Successfully ran terraform apply ({})", result.version);
                return Ok(result);
            }
            Err(err) => err,
        };

        log::error!("Failed to run terraform apply");
        if !matches!(err, Error::ApplyFailed { .. }) {
            return Err(err);
        }

        if !self.delete_on_failure {
            self.preserve_partial_state().await;
            return Err(err);
        }

        log::warn!("Cleaning up partially created resources...");
        match self.attempt_destroy().await {
            Ok(_) => {
                log::warn!("Cleanup finished; the apply error still stands");
                Err(err)
            }
            Err(destroy_err) => {
                log::error!("Failed to run terraform destroy");
                self.preserve_partial_state().await;
                Err(Error::rollback_failed(err, destroy_err))
            }
        }
    }

    /// Tear down the environment; succeeds if it never existed
    pub async fn destroy(&self) -> Result<ActionResult> {
        self.validate()?;

        log::info!("== Terraform Destroy: {} ==", self.env_name);
        let exists = match &self.backend {
            StateBackend::Workspace => {
                self.client.init_with_backend(&self.env_name).await?;
                self.workspace_exists().await?
            }
            StateBackend::Legacy(state_file) => {
                self.client.init().await?;
                !state_file.download().await?.is_zero()
            }
        };

        if !exists {
            log::info!(
                "Environment '{}' has no state; nothing to destroy",
                self.env_name
            );
            return Ok(self.destroyed());
        }

        let result = self.attempt_destroy().await?;
        log::info!("Successfully ran terraform destroy");
        Ok(result)
    }

    /// Read the latest state and outputs without mutating anything.
    ///
    /// A missing environment is an error, unless `plan_only` is set, in
    /// which case a zero version is returned.
    pub async fn fetch(&self, plan_only: bool) -> Result<ActionResult> {
        self.validate()?;

        match &self.backend {
            StateBackend::Workspace => {
                self.client.init_with_backend(&self.env_name).await?;
                if !self.workspace_exists().await? {
                    return self.missing_state(
                        plan_only,
                        format!("Workspace '{}' does not exist in backend.", self.env_name),
                    );
                }
                let serial = self.current_serial().await?;
                let output = self.client.output(&self.env_name).await?;
                Ok(ActionResult::new(
                    Version::from_serial(&self.env_name, serial),
                    output,
                ))
            }
            StateBackend::Legacy(state_file) => {
                self.client.init().await?;
                let storage_version = state_file.download().await?;
                if storage_version.is_zero() {
                    return self.missing_state(
                        plan_only,
                        format!(
                            "State file does not exist with key '{}'.",
                            state_file.remote_path()
                        ),
                    );
                }
                let output = self.client.output(&self.env_name).await?;
                Ok(ActionResult::new(
                    Version::from_storage(&self.env_name, &storage_version),
                    output,
                ))
            }
        }
    }

    /// Create the workspace unless it already exists.
    ///
    /// Running this twice in sequence leaves exactly one workspace.
    pub async fn ensure_workspace(&self) -> Result<()> {
        if self.workspace_exists().await? {
            return Ok(());
        }
        log::info!("Creating workspace '{}'", self.env_name);
        self.client.workspace_new(&self.env_name).await
    }

    /// Raw state document as of the last fetch or apply
    pub async fn state_contents(&self) -> Result<Vec<u8>> {
        match &self.backend {
            StateBackend::Workspace => self.client.state_pull(&self.env_name).await,
            StateBackend::Legacy(state_file) => Ok(state_file.read_local().await?),
        }
    }

    /// Version string of the provisioning engine
    pub async fn engine_version(&self) -> Result<String> {
        self.client.version().await
    }

    async fn workspace_exists(&self) -> Result<bool> {
        let workspaces = self.client.workspace_list().await?;
        Ok(workspaces.iter().any(|name| name == &self.env_name))
    }

    /// Init and imports; nothing here mutates infrastructure
    async fn setup(&self) -> Result<()> {
        match &self.backend {
            StateBackend::Workspace => {
                self.client.init_with_backend(&self.env_name).await?;
                self.ensure_workspace().await?;
            }
            StateBackend::Legacy(state_file) => {
                self.client.init().await?;
                let prior = state_file.download().await?;
                if prior.is_zero() {
                    log::info!(
                        "No prior state at '{}'; this is the first apply",
                        state_file.remote_path()
                    );
                }
            }
        }

        if self.imports.is_empty() {
            return Ok(());
        }

        let tracked = self.client.state_list(&self.env_name).await?;
        for (address, id) in &self.imports {
            if tracked.iter().any(|t| t == address) {
                log::info!("Skipping import of '{}': already in state", address);
                continue;
            }
            log::info!("Importing '{}' as '{}'", id, address);
            self.client.import(&self.env_name, address, id).await?;
        }
        Ok(())
    }

    /// Apply and read the result back.
    ///
    /// An engine failure comes back as `Error::ApplyFailed`; failures after
    /// the engine succeeded come back as `Error::PostApplyVerification`.
    async fn attempt_apply(&self) -> Result<ActionResult> {
        self.client
            .apply(&self.env_name)
            .await
            .map_err(Error::apply_failed)?;

        self.finalize().await.map_err(Error::post_apply)
    }

    async fn finalize(&self) -> Result<ActionResult> {
        let version = match &self.backend {
            StateBackend::Workspace => {
                Version::from_serial(&self.env_name, self.current_serial().await?)
            }
            StateBackend::Legacy(state_file) => {
                let storage_version = state_file.upload().await?;
                Version::from_storage(&self.env_name, &storage_version)
            }
        };
        let output = self.client.output(&self.env_name).await?;
        Ok(ActionResult::new(version, output))
    }

    async fn attempt_destroy(&self) -> Result<ActionResult> {
        self.client.destroy(&self.env_name).await?;

        match &self.backend {
            StateBackend::Workspace => {
                if self.env_name == DEFAULT_WORKSPACE {
                    log::warn!("Keeping the '{}' workspace", DEFAULT_WORKSPACE);
                } else {
                    self.client.workspace_delete(&self.env_name).await?;
                }
            }
            StateBackend::Legacy(state_file) => state_file.delete().await?,
        }

        Ok(self.destroyed())
    }

    /// After a failed legacy apply, keep track of whatever was created
    async fn preserve_partial_state(&self) {
        let StateBackend::Legacy(state_file) = &self.backend else {
            return;
        };
        if !state_file.exists_locally() {
            return;
        }
        match state_file.upload().await {
            Ok(version) => log::warn!(
                "Uploaded partial state to '{}' (version {})",
                state_file.remote_path(),
                version
            ),
            Err(e) => log::error!("Failed to upload partial state: {}", e),
        }
    }

    fn destroyed(&self) -> ActionResult {
        ActionResult::without_output(Version::empty(&self.env_name))
    }

    fn missing_state(&self, plan_only: bool, message: String) -> Result<ActionResult> {
        if plan_only {
            log::info!("{} Returning an empty plan version.", message);
            return Ok(ActionResult::without_output(Version::plan(&self.env_name)));
        }
        Err(Error::StorageNotFound(format!(
            "{}\nIf you intended to run the `destroy` action, add `put.get_params.action: destroy`.",
            message
        )))
    }

    /// Serial of the current state document
    async fn current_serial(&self) -> Result<u64> {
        let raw = self.client.state_pull(&self.env_name).await?;
        parse_serial(&raw)
    }
}

/// Extract the top-level numeric `serial` from a state document
pub fn parse_serial(raw: &[u8]) -> Result<u64> {
    let state: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
        Error::malformed_state(format!(
            "Failed to unmarshal JSON output.\nError: {}\nOutput: {}",
            e,
            String::from_utf8_lossy(raw)
        ))
    })?;

    match state.get("serial") {
        Some(serial) => serial.as_u64().ok_or_else(|| {
            Error::malformed_state(format!(
                "Expected number value for 'serial' but got '{}'",
                serial
            ))
        }),
        None => Err(Error::malformed_state("State has no 'serial' field")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputRecord, Outputs};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_parse_serial() {
        assert_eq!(parse_serial(br#"{"version": 4, "serial": 12}"#).unwrap(), 12);

        let err = parse_serial(br#"{"version": 4}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedState(_)));

        let err = parse_serial(br#"{"serial": "12"}"#).unwrap_err();
        assert!(err.to_string().contains("Expected number value for 'serial'"));

        let err = parse_serial(b"<html>").unwrap_err();
        assert!(err.to_string().contains("<html>"));
    }

    // Minimal client recording calls; apply outcome is configurable
    #[derive(Default)]
    struct MockClient {
        calls: Mutex<Vec<String>>,
        workspaces: Mutex<Vec<String>>,
        apply_error: Option<&'static str>,
        destroy_error: Option<&'static str>,
        output_error: bool,
        /// Another run creates the workspace between list and create
        race_on_create: bool,
    }

    impl MockClient {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn tool_error(command: &str, output: &str) -> Error {
        Error::external_tool(command, "exit status: 1", output)
    }

    #[async_trait]
    impl ProvisioningClient for MockClient {
        async fn init_with_backend(&self, _env_name: &str) -> Result<()> {
            self.record("init_with_backend");
            Ok(())
        }

        async fn init(&self) -> Result<()> {
            self.record("init");
            Ok(())
        }

        async fn workspace_list(&self) -> Result<Vec<String>> {
            self.record("workspace_list");
            Ok(self.workspaces.lock().unwrap().clone())
        }

        async fn workspace_new(&self, name: &str) -> Result<()> {
            self.record(format!("workspace_new {}", name));
            if self.race_on_create {
                return Err(Error::WorkspaceRace {
                    workspace: name.to_string(),
                    output: format!("Workspace \"{}\" already exists", name),
                });
            }
            self.workspaces.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn workspace_delete(&self, name: &str) -> Result<()> {
            self.record(format!("workspace_delete {}", name));
            self.workspaces.lock().unwrap().retain(|w| w != name);
            Ok(())
        }

        async fn apply(&self, _env_name: &str) -> Result<()> {
            self.record("apply");
            match self.apply_error {
                Some(message) => Err(tool_error("terraform apply", message)),
                None => Ok(()),
            }
        }

        async fn destroy(&self, _env_name: &str) -> Result<()> {
            self.record("destroy");
            match self.destroy_error {
                Some(message) => Err(tool_error("terraform destroy", message)),
                None => Ok(()),
            }
        }

        async fn state_pull(&self, _env_name: &str) -> Result<Vec<u8>> {
            self.record("state_pull");
            Ok(br#"{"serial": 5}"#.to_vec())
        }

        async fn state_list(&self, _env_name: &str) -> Result<Vec<String>> {
            self.record("state_list");
            Ok(vec!["aws_s3_bucket.existing".to_string()])
        }

        async fn import(&self, _env_name: &str, address: &str, id: &str) -> Result<()> {
            self.record(format!("import {} {}", address, id));
            Ok(())
        }

        async fn output(&self, _env_name: &str) -> Result<Outputs> {
            self.record("output");
            if self.output_error {
                return Err(tool_error("terraform output -json", "Error: backend unreachable"));
            }
            let mut outputs = Outputs::new();
            outputs.insert("url".to_string(), OutputRecord::new(json!("http://x")));
            Ok(outputs)
        }

        async fn version(&self) -> Result<String> {
            Ok("1.5.7".to_string())
        }
    }

    fn workspace_action(client: Arc<MockClient>) -> Action {
        Action::new(client, StateBackend::Workspace, "staging")
    }

    #[tokio::test]
    async fn test_apply_creates_workspace_and_reports_serial() {
        let client = Arc::new(MockClient::default());
        let result = workspace_action(client.clone()).apply().await.unwrap();

        assert_eq!(result.version, Version::from_serial("staging", 5));
        assert_eq!(result.sanitized_output()["url"], "http://x");
        assert_eq!(
            client.calls(),
            vec![
                "init_with_backend",
                "workspace_list",
                "workspace_new staging",
                "apply",
                "state_pull",
                "output",
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_skips_existing_workspace() {
        let client = Arc::new(MockClient::default());
        client.workspaces.lock().unwrap().push("staging".to_string());

        workspace_action(client.clone()).apply().await.unwrap();
        assert!(!client.calls().iter().any(|c| c.starts_with("workspace_new")));
    }

    #[tokio::test]
    async fn test_imports_skip_tracked_addresses() {
        let client = Arc::new(MockClient::default());
        let imports = BTreeMap::from([
            ("aws_s3_bucket.existing".to_string(), "bucket-a".to_string()),
            ("aws_vpc.main".to_string(), "vpc-123".to_string()),
        ]);

        workspace_action(client.clone())
            .with_imports(imports)
            .apply()
            .await
            .unwrap();

        let calls = client.calls();
        assert!(calls.contains(&"import aws_vpc.main vpc-123".to_string()));
        assert!(!calls.iter().any(|c| c.contains("bucket-a")));
    }

    #[tokio::test]
    async fn test_apply_failure_without_rollback() {
        let client = Arc::new(MockClient {
            apply_error: Some("Error: quota exceeded"),
            ..Default::default()
        });

        let err = workspace_action(client.clone()).apply().await.unwrap_err();
        assert!(matches!(err, Error::ApplyFailed { .. }));
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!client.calls().contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn test_apply_failure_rolls_back() {
        let client = Arc::new(MockClient {
            apply_error: Some("Error: quota exceeded"),
            ..Default::default()
        });

        let err = workspace_action(client.clone())
            .with_delete_on_failure(true)
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ApplyFailed { .. }));
        assert!(err.to_string().contains("quota exceeded"));
        let calls = client.calls();
        assert!(calls.ends_with(&["destroy".to_string(), "workspace_delete staging".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_both_errors() {
        let client = Arc::new(MockClient {
            apply_error: Some("Error: quota exceeded"),
            destroy_error: Some("Error: dependency violation"),
            ..Default::default()
        });

        let err = workspace_action(client)
            .with_delete_on_failure(true)
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RollbackFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("quota exceeded"));
        assert!(message.contains("dependency violation"));
        assert!(message.find("quota exceeded") < message.find("dependency violation"));
    }

    #[tokio::test]
    async fn test_output_failure_after_apply_is_post_apply_error() {
        let client = Arc::new(MockClient {
            output_error: true,
            ..Default::default()
        });

        let err = workspace_action(client.clone())
            .with_delete_on_failure(true)
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PostApplyVerification { .. }));
        assert!(err.to_string().contains("backend unreachable"));
        // infrastructure is live; no compensating destroy
        assert!(!client.calls().contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn test_workspace_race_is_not_rolled_back() {
        let client = Arc::new(MockClient {
            race_on_create: true,
            ..Default::default()
        });

        let err = workspace_action(client.clone())
            .with_delete_on_failure(true)
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::WorkspaceRace { .. }));
        assert!(err.to_string().contains("already exists"));
        let calls = client.calls();
        assert_eq!(
            calls,
            vec!["init_with_backend", "workspace_list", "workspace_new staging"]
        );
    }

    #[tokio::test]
    async fn test_destroy_never_applied_workspace() {
        let client = Arc::new(MockClient::default());
        let result = workspace_action(client.clone()).destroy().await.unwrap();

        assert!(result.output.is_empty());
        assert!(result.version.is_zero());
        assert!(!client.calls().contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn test_destroy_existing_workspace() {
        let client = Arc::new(MockClient::default());
        client.workspaces.lock().unwrap().push("staging".to_string());

        let result = workspace_action(client.clone()).destroy().await.unwrap();
        assert!(result.output.is_empty());
        assert!(client.workspaces.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_keeps_default_workspace() {
        let client = Arc::new(MockClient::default());
        client.workspaces.lock().unwrap().push("default".to_string());

        Action::new(client.clone(), StateBackend::Workspace, "default")
            .destroy()
            .await
            .unwrap();
        assert!(client.calls().contains(&"destroy".to_string()));
        assert!(!client.calls().iter().any(|c| c.starts_with("workspace_delete")));
    }

    #[tokio::test]
    async fn test_ensure_workspace_twice() {
        let client = Arc::new(MockClient::default());
        let action = workspace_action(client.clone());

        action.ensure_workspace().await.unwrap();
        action.ensure_workspace().await.unwrap();
        assert_eq!(*client.workspaces.lock().unwrap(), vec!["staging".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_missing_workspace() {
        let client = Arc::new(MockClient::default());
        let action = workspace_action(client);

        let result = action.fetch(true).await.unwrap();
        assert!(result.version.is_zero());
        assert!(result.version.is_plan());
        assert!(result.output.is_empty());

        let err = action.fetch(false).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Workspace 'staging' does not exist"));
    }

    #[tokio::test]
    async fn test_fetch_existing_workspace() {
        let client = Arc::new(MockClient::default());
        client.workspaces.lock().unwrap().push("staging".to_string());

        let result = workspace_action(client).fetch(false).await.unwrap();
        assert_eq!(result.version.serial, Some(5));
        assert_eq!(result.raw_output()["url"], json!("http://x"));
    }

    #[tokio::test]
    async fn test_empty_env_name_is_rejected() {
        let client = Arc::new(MockClient::default());
        let err = Action::new(client.clone(), StateBackend::Workspace, " ")
            .apply()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(client.calls().is_empty());
    }
}
