//! Request - Pipeline request/response models and their resolution
//!
//! A request carries the resource `source` (shared by every step), an
//! optional `version` and step `params`. Source and params are merged into
//! `Settings`, from which an `Action` is built.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use terrace_state::{StateFile, StorageConfig, build_driver};

use crate::action::{Action, StateBackend};
use crate::error::{Error, Result};
use crate::output::ActionResult;
use crate::terraform::{TerraformClient, TerraformConfig};
use crate::version::{Mode, Version};

/// What a put step does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Create,
    Destroy,
}

/// Resource configuration shared by every step
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Source {
    pub env_name: Option<String>,
    /// Remote backend type; selects workspace mode when set
    pub backend_type: Option<String>,
    pub backend_config: BTreeMap<String, serde_json::Value>,
    /// Legacy blob storage; required when `backend_type` is unset
    pub storage: Option<StorageConfig>,
    pub terraform_source: Option<String>,
    pub vars: BTreeMap<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
    pub delete_on_failure: bool,
    pub imports: BTreeMap<String, String>,
    pub private_key: Option<String>,
}

/// Step parameters; get steps only read `action`, `output_module` and
/// `output_statefile`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Params {
    pub action: ActionKind,
    pub env_name: Option<String>,
    /// File (relative to the working directory) holding the env name
    pub env_name_file: Option<String>,
    pub generate_random_name: bool,
    pub terraform_source: Option<String>,
    pub vars: BTreeMap<String, serde_json::Value>,
    pub var_files: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub delete_on_failure: bool,
    pub imports: BTreeMap<String, String>,
    pub import_files: Vec<String>,
    pub output_module: Option<String>,
    pub output_statefile: bool,
    /// Preview only: report the current version without mutating anything
    pub plan_only: bool,
}

/// A request as read from stdin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub params: Params,
}

/// One name/value pair shown next to a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// A response as written to stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataField>,
}

impl Response {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            metadata: Vec::new(),
        }
    }

    /// Version plus sanitized outputs (sorted by name) and the engine version
    pub fn from_result(result: &ActionResult, terraform_version: Option<String>) -> Self {
        let mut metadata: Vec<MetadataField> = result
            .sanitized_output()
            .into_iter()
            .map(|(name, value)| MetadataField { name, value })
            .collect();
        if let Some(value) = terraform_version {
            metadata.push(MetadataField {
                name: "terraform_version".to_string(),
                value,
            });
        }
        Self {
            version: result.version.clone(),
            metadata,
        }
    }
}

/// Source and params merged into what one step runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub action: ActionKind,
    pub env_name: String,
    /// Engine working directory; the scratch directory when unset
    pub terraform_source: Option<PathBuf>,
    pub backend_type: Option<String>,
    pub backend_config: BTreeMap<String, serde_json::Value>,
    pub storage: Option<StorageConfig>,
    pub vars: BTreeMap<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
    pub delete_on_failure: bool,
    pub imports: BTreeMap<String, String>,
    pub output_module: Option<String>,
    pub output_statefile: bool,
    pub plan_only: bool,
}

impl Request {
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::validation(format!("Failed to parse request: {}", e)))
    }

    /// Settings for a put step; files are resolved against `work_dir`
    pub fn put_settings(&self, work_dir: &Path) -> Result<Settings> {
        let env_name = self.resolve_env_name(work_dir)?;
        let source = self
            .params
            .terraform_source
            .as_deref()
            .or(self.source.terraform_source.as_deref())
            .ok_or_else(|| Error::validation("Missing required field `terraform_source`"))?;
        self.merge(work_dir, env_name, Some(work_dir.join(source)))
    }

    /// Settings for a get step; the environment comes from the version
    pub fn get_settings(&self, work_dir: &Path) -> Result<Settings> {
        let version = self
            .version
            .as_ref()
            .ok_or_else(|| Error::validation("Missing `version` in request"))?;
        version
            .validate()
            .map_err(|e| Error::validation(format!("Invalid Version request: {}", e)))?;

        // unset source runs terraform in scratch, never in the output dir
        let source = self
            .source
            .terraform_source
            .as_ref()
            .map(|source| work_dir.join(source));
        self.merge(work_dir, version.env_name.clone(), source)
    }

    /// First of: explicit name, name file, generated name, source default
    pub fn resolve_env_name(&self, work_dir: &Path) -> Result<String> {
        let params = &self.params;
        let name = if let Some(name) = non_empty(&params.env_name) {
            name.to_string()
        } else if let Some(file) = non_empty(&params.env_name_file) {
            let path = work_dir.join(file);
            std::fs::read_to_string(&path)
                .map_err(|e| {
                    Error::validation(format!(
                        "Failed to read env_name_file '{}': {}",
                        path.display(),
                        e
                    ))
                })?
                .trim()
                .to_string()
        } else if params.generate_random_name {
            generate_env_name()
        } else if let Some(name) = non_empty(&self.source.env_name) {
            name.to_string()
        } else {
            return Err(Error::validation(
                "Must specify `put.params.env_name`, `put.params.env_name_file`, \
                 `put.params.generate_random_name`, or `source.env_name`",
            ));
        };

        if name.is_empty() {
            return Err(Error::validation("Resolved env_name is empty"));
        }
        Ok(name)
    }

    fn merge(
        &self,
        work_dir: &Path,
        env_name: String,
        terraform_source: Option<PathBuf>,
    ) -> Result<Settings> {
        let source = &self.source;
        let params = &self.params;

        if source.private_key.is_some() {
            log::warn!("`source.private_key` is ignored; configure module access on the agent");
        }

        let mut vars = source.vars.clone();
        for file in &params.var_files {
            vars.extend(load_map::<serde_json::Value>(work_dir, file, "var file")?);
        }
        vars.extend(params.vars.clone());

        let mut imports = source.imports.clone();
        for file in &params.import_files {
            imports.extend(load_map::<String>(work_dir, file, "import file")?);
        }
        imports.extend(params.imports.clone());

        let mut env = source.env.clone();
        env.extend(params.env.clone());

        let settings = Settings {
            action: params.action,
            env_name,
            terraform_source,
            backend_type: non_empty(&source.backend_type).map(str::to_string),
            backend_config: source.backend_config.clone(),
            storage: source.storage.clone(),
            vars,
            env,
            delete_on_failure: source.delete_on_failure || params.delete_on_failure,
            imports,
            output_module: non_empty(&params.output_module).map(str::to_string),
            output_statefile: params.output_statefile,
            plan_only: params.plan_only,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Settings {
    pub fn mode(&self) -> Mode {
        if self.backend_type.is_some() {
            Mode::Workspace
        } else {
            Mode::Legacy
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.env_name.trim().is_empty() {
            return Err(Error::validation("env_name must not be empty"));
        }
        match (&self.backend_type, &self.storage) {
            (None, None) => Err(Error::validation(
                "Must specify `source.backend_type` or `source.storage`",
            )),
            (Some(_), Some(_)) => Err(Error::validation(
                "`source.backend_type` and `source.storage` are mutually exclusive",
            )),
            _ => Ok(()),
        }
    }

    /// Engine settings; `state_file` is set in legacy mode only
    pub fn terraform_config(
        &self,
        scratch_dir: &Path,
        state_file: Option<&StateFile>,
    ) -> TerraformConfig {
        let source = self.terraform_source.as_deref().unwrap_or(scratch_dir);
        let mut config = TerraformConfig::new(source, scratch_dir);
        config.vars = self.vars.clone();
        config.env = self.env.clone();
        config.output_module = self.output_module.clone();
        match state_file {
            Some(state_file) => {
                config.state_file_local_path = Some(state_file.local_path().to_path_buf());
            }
            None => {
                config.backend_type = self.backend_type.clone();
                config.backend_config = self.backend_config.clone();
            }
        }
        config
    }

    /// Wire the engine and state persistence into an Action.
    ///
    /// Local files (var file, legacy state copy) go under `scratch_dir`.
    pub async fn build_action(&self, scratch_dir: &Path) -> Result<Action> {
        let (backend, config) = match (self.mode(), &self.storage) {
            (Mode::Legacy, Some(storage)) => {
                let driver = Arc::from(build_driver(storage).await?);
                let state_file = StateFile::for_env(&self.env_name, scratch_dir, driver);
                let config = self.terraform_config(scratch_dir, Some(&state_file));
                (StateBackend::Legacy(state_file), config)
            }
            _ => (StateBackend::Workspace, self.terraform_config(scratch_dir, None)),
        };
        config.validate()?;

        log::debug!(
            "Running in {} mode for environment '{}'",
            backend.mode(),
            self.env_name
        );
        let client = Arc::new(TerraformClient::new(config));
        Ok(Action::new(client, backend, &self.env_name)
            .with_delete_on_failure(self.delete_on_failure)
            .with_imports(self.imports.clone()))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Read a YAML (or JSON) map from a file relative to `work_dir`
fn load_map<T: DeserializeOwned>(
    work_dir: &Path,
    file: &str,
    kind: &str,
) -> Result<BTreeMap<String, T>> {
    let path = work_dir.join(file);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::validation(format!("Failed to read {} '{}': {}", kind, path.display(), e))
    })?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&contents).map_err(|e| {
        Error::validation(format!("Failed to parse {} '{}': {}", kind, path.display(), e))
    })
}

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dapper", "eager", "fancy", "gentle", "hidden", "icy", "jolly",
    "keen", "lucky", "mellow", "nimble", "odd", "proud", "quiet", "rapid", "sunny", "tidy",
];

const NOUNS: &[&str] = &[
    "badger", "canyon", "delta", "ember", "falcon", "glacier", "harbor", "island", "jungle",
    "kernel", "lagoon", "meadow", "nebula", "orchid", "pebble", "quarry", "river", "summit",
    "tundra", "valley",
];

/// Random `<adjective>-<noun>-<hex>` environment name
pub fn generate_env_name() -> String {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let noun = NOUNS[bytes[1] as usize % NOUNS.len()];
    let suffix = &id.simple().to_string()[..6];
    format!("{}-{}-{}", adjective, noun, suffix)
}
