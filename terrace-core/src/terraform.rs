//! ProvisioningClient backed by the `terraform` CLI

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::client::{DEFAULT_WORKSPACE, ProvisioningClient};
use crate::error::{Error, Result};
use crate::output::Outputs;
use crate::version::Mode;

/// Settings for one invocation of the terraform CLI
#[derive(Debug, Clone)]
pub struct TerraformConfig {
    /// Executable to run
    pub binary: PathBuf,
    /// Directory containing the terraform configuration
    pub source: PathBuf,
    /// Per-invocation directory for generated files (var files)
    pub scratch_dir: PathBuf,
    /// Input variables
    pub vars: BTreeMap<String, serde_json::Value>,
    /// Extra environment variables for every command
    pub env: BTreeMap<String, String>,
    /// Remote backend type (workspace mode)
    pub backend_type: Option<String>,
    /// Remote backend settings (workspace mode)
    pub backend_config: BTreeMap<String, serde_json::Value>,
    /// Local state file (legacy mode)
    pub state_file_local_path: Option<PathBuf>,
    /// Restrict outputs to one module
    pub output_module: Option<String>,
}

impl TerraformConfig {
    pub const DEFAULT_BINARY: &'static str = "terraform";
    /// Override file that selects the backend type
    pub const BACKEND_OVERRIDE_FILE: &'static str = "terrace_backend_override.tf.json";
    pub const VARS_FILE: &'static str = "vars.tfvars.json";

    pub fn new(source: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from(Self::DEFAULT_BINARY),
            source: source.into(),
            scratch_dir: scratch_dir.into(),
            vars: BTreeMap::new(),
            env: BTreeMap::new(),
            backend_type: None,
            backend_config: BTreeMap::new(),
            state_file_local_path: None,
            output_module: None,
        }
    }

    pub fn mode(&self) -> Mode {
        if self.state_file_local_path.is_some() {
            Mode::Legacy
        } else {
            Mode::Workspace
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.source.is_dir() {
            return Err(Error::validation(format!(
                "terraform source '{}' is not a directory",
                self.source.display()
            )));
        }
        match (&self.backend_type, &self.state_file_local_path) {
            (Some(_), Some(_)) => Err(Error::validation(
                "backend_type and a legacy state file are mutually exclusive",
            )),
            (None, None) => Err(Error::validation(
                "either backend_type or legacy storage must be configured",
            )),
            _ => Ok(()),
        }
    }
}

/// Captured result of a successful command
struct CommandOutput {
    stdout: Vec<u8>,
    combined: String,
}

/// Runs the terraform CLI as a child process per operation
pub struct TerraformClient {
    config: TerraformConfig,
}

impl TerraformClient {
    pub fn new(config: TerraformConfig) -> Self {
        Self { config }
    }

    /// TF_WORKSPACE value for workspace-scoped commands
    fn workspace<'a>(&self, env_name: &'a str) -> Option<&'a str> {
        match self.config.mode() {
            Mode::Workspace => Some(env_name),
            Mode::Legacy => None,
        }
    }

    fn state_args(&self) -> Vec<String> {
        match &self.config.state_file_local_path {
            Some(path) => vec![format!("-state={}", path.display())],
            None => Vec::new(),
        }
    }

    fn legacy_state_missing(&self) -> bool {
        self.config
            .state_file_local_path
            .as_deref()
            .is_some_and(|path| !path.is_file())
    }

    /// Write input variables to the scratch directory and reference them
    async fn var_file_args(&self) -> Result<Vec<String>> {
        if self.config.vars.is_empty() {
            return Ok(Vec::new());
        }

        let path = self.config.scratch_dir.join(TerraformConfig::VARS_FILE);
        let content = serde_json::to_vec_pretty(&self.config.vars)
            .map_err(|e| Error::validation(format!("Failed to serialize vars: {}", e)))?;
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::validation(format!(
                "Failed to write vars file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(vec![format!("-var-file={}", path.display())])
    }

    async fn write_backend_override(&self, backend_type: &str) -> Result<()> {
        let path = backend_override_path(&self.config.source);
        let content = serde_json::json!({
            "terraform": { "backend": { backend_type: {} } }
        });
        let content = serde_json::to_vec_pretty(&content)
            .map_err(|e| Error::validation(format!("Failed to serialize backend: {}", e)))?;
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::validation(format!(
                "Failed to write backend override '{}': {}",
                path.display(),
                e
            ))
        })
    }

    async fn run(&self, args: &[String], workspace: Option<&str>) -> Result<CommandOutput> {
        let display = display_command(args);
        log::debug!("Running: {}", display);

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .current_dir(&self.config.source)
            .env("TF_IN_AUTOMATION", "true")
            .env("TF_INPUT", "false")
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match workspace {
            Some(name) => cmd.env("TF_WORKSPACE", name),
            None => cmd.env_remove("TF_WORKSPACE"),
        };

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::external_tool(&display, format!("failed to start: {}", e), ""))?;

        let combined = {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
                (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
                (false, true) => stdout.trim_end().to_string(),
                _ => stderr.trim_end().to_string(),
            }
        };

        if !output.status.success() {
            return Err(Error::external_tool(
                display,
                output.status.to_string(),
                combined,
            ));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            combined,
        })
    }

    /// Run a mutating command and echo its progress
    async fn run_logged(&self, args: &[String], workspace: Option<&str>) -> Result<()> {
        let output = self.run(args, workspace).await?;
        for line in output.combined.lines() {
            log::info!("{}", line);
        }
        Ok(())
    }

    async fn mutate(&self, command: &str, env_name: &str) -> Result<()> {
        let mut args = vec![
            command.to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(self.var_file_args().await?);
        args.extend(self.state_args());
        self.run_logged(&args, self.workspace(env_name)).await
    }
}

#[async_trait]
impl ProvisioningClient for TerraformClient {
    async fn init_with_backend(&self, env_name: &str) -> Result<()> {
        let backend_type = self
            .config
            .backend_type
            .as_deref()
            .ok_or_else(|| Error::validation("init_with_backend requires backend_type"))?;
        self.write_backend_override(backend_type).await?;

        let mut args = vec![
            "init".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-reconfigure".to_string(),
            "-get=true".to_string(),
        ];
        for (key, value) in &self.config.backend_config {
            args.push(format!("-backend-config={}={}", key, render_scalar(value)));
        }

        log::info!(
            "Initializing {} backend for environment '{}'",
            backend_type,
            env_name
        );
        self.run(&args, None).await?;
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        let args = [
            "init",
            "-input=false",
            "-no-color",
            "-backend=false",
            "-get=true",
        ]
        .map(String::from);
        self.run(&args, None).await?;
        Ok(())
    }

    async fn workspace_list(&self) -> Result<Vec<String>> {
        let args = ["workspace", "list"].map(String::from);
        let output = self.run(&args, None).await?;
        Ok(parse_workspace_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn workspace_new(&self, name: &str) -> Result<()> {
        let args = ["workspace", "new", name].map(String::from);
        match self.run(&args, None).await {
            Ok(_) => Ok(()),
            Err(Error::ExternalTool { output, .. }) if output.contains("already exists") => {
                Err(Error::WorkspaceRace {
                    workspace: name.to_string(),
                    output,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn workspace_delete(&self, name: &str) -> Result<()> {
        // `workspace new` switched to `name`, and the active workspace cannot be deleted
        let args = ["workspace", "delete", name].map(String::from);
        self.run(&args, Some(DEFAULT_WORKSPACE)).await?;
        Ok(())
    }

    async fn apply(&self, env_name: &str) -> Result<()> {
        self.mutate("apply", env_name).await
    }

    async fn destroy(&self, env_name: &str) -> Result<()> {
        self.mutate("destroy", env_name).await
    }

    async fn state_pull(&self, env_name: &str) -> Result<Vec<u8>> {
        if let Some(path) = &self.config.state_file_local_path {
            return tokio::fs::read(path).await.map_err(|e| {
                Error::StorageRead(format!(
                    "Failed to read state file '{}': {}",
                    path.display(),
                    e
                ))
            });
        }

        let args = ["state", "pull"].map(String::from);
        let output = self.run(&args, self.workspace(env_name)).await?;
        Ok(output.stdout)
    }

    async fn state_list(&self, env_name: &str) -> Result<Vec<String>> {
        if self.legacy_state_missing() {
            return Ok(Vec::new());
        }

        let mut args = vec!["state".to_string(), "list".to_string()];
        args.extend(self.state_args());
        let output = self.run(&args, self.workspace(env_name)).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn import(&self, env_name: &str, address: &str, id: &str) -> Result<()> {
        let mut args = vec![
            "import".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(self.var_file_args().await?);
        args.extend(self.state_args());
        args.push(address.to_string());
        args.push(id.to_string());
        self.run_logged(&args, self.workspace(env_name)).await
    }

    async fn output(&self, env_name: &str) -> Result<Outputs> {
        if self.legacy_state_missing() {
            return Ok(Outputs::new());
        }

        let mut args = vec![
            "output".to_string(),
            "-json".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(self.state_args());
        if let Some(module) = &self.config.output_module {
            args.push(format!("-module={}", module));
        }

        let output = self.run(&args, self.workspace(env_name)).await?;
        parse_outputs(&output.stdout).map_err(|e| {
            Error::external_tool(
                display_command(&args),
                format!("unparsable output JSON: {}", e),
                String::from_utf8_lossy(&output.stdout),
            )
        })
    }

    async fn version(&self) -> Result<String> {
        let args = ["-v".to_string()];
        let output = self.run(&args, None).await?;
        parse_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            Error::external_tool(
                "terraform -v",
                "unrecognized version output",
                output.combined.clone(),
            )
        })
    }
}

/// Command line for logs and errors, with backend settings masked
fn display_command(args: &[String]) -> String {
    let masked: Vec<String> = args
        .iter()
        .map(|arg| match arg.strip_prefix("-backend-config=") {
            Some(setting) => {
                let key = setting.split('=').next().unwrap_or_default();
                format!("-backend-config={}=***", key)
            }
            None => arg.clone(),
        })
        .collect();
    format!("terraform {}", masked.join(" "))
}

/// Backend settings are passed as text; strings lose their JSON quotes
fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `terraform workspace list`, where the current workspace is starred
fn parse_workspace_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_outputs(stdout: &[u8]) -> serde_json::Result<Outputs> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Outputs::new());
    }
    serde_json::from_slice(stdout)
}

/// "Terraform v1.5.7\non linux_amd64" -> "1.5.7"
fn parse_version(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?.trim();
    let version = first.strip_prefix("Terraform v")?;
    Some(version.trim().to_string())
}

/// Path of the backend override file for a source directory
pub fn backend_override_path(source: &Path) -> PathBuf {
    source.join(TerraformConfig::BACKEND_OVERRIDE_FILE)
}
