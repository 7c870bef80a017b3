//! Error taxonomy for state lifecycle operations

use terrace_state::StorageError;
use thiserror::Error;

/// Errors produced while applying, destroying or reading an environment
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or configuration, raised before any side effect
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// State (remote object or workspace) does not exist
    #[error("{0}")]
    StorageNotFound(String),

    /// Failed to read state or its metadata from the store
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Failed to write or delete state in the store
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// The provisioning engine exited non-zero or produced unusable output
    #[error("`{command}` failed: {message}\nOutput:\n{output}")]
    ExternalTool {
        command: String,
        message: String,
        output: String,
    },

    /// Another run created the workspace between our list and create
    #[error(
        "Workspace '{workspace}' was created concurrently by another run; \
         operations on one environment must be serialized.\nOutput:\n{output}"
    )]
    WorkspaceRace { workspace: String, output: String },

    /// State document lacks a usable serial
    #[error("Malformed state: {0}")]
    MalformedState(String),

    /// Infrastructure was mutated, but reading it back failed
    #[error("Apply succeeded but its result could not be read back; infrastructure may be live.\n{source}")]
    PostApplyVerification { source: Box<Error> },

    /// The apply step itself failed
    #[error("Apply Error: {source}")]
    ApplyFailed { source: Box<Error> },

    /// The apply step failed and the compensating destroy failed too
    #[error("Apply Error: {apply}\nDestroy Error: {destroy}")]
    RollbackFailed { apply: Box<Error>, destroy: Box<Error> },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn external_tool(
        command: impl Into<String>,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::ExternalTool {
            command: command.into(),
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn malformed_state(message: impl Into<String>) -> Self {
        Self::MalformedState(message.into())
    }

    pub fn post_apply(source: Error) -> Self {
        Self::PostApplyVerification {
            source: Box::new(source),
        }
    }

    pub fn apply_failed(source: Error) -> Self {
        Self::ApplyFailed {
            source: Box::new(source),
        }
    }

    /// Combine a failed apply with the failure of its compensation
    pub fn rollback_failed(apply: Error, destroy: Error) -> Self {
        let apply = match apply {
            Self::ApplyFailed { source } => source,
            other => Box::new(other),
        };
        Self::RollbackFailed {
            apply,
            destroy: Box::new(destroy),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StorageNotFound(_))
    }

    /// True for failures that happened after infrastructure was mutated
    pub fn infrastructure_may_be_live(&self) -> bool {
        matches!(
            self,
            Self::PostApplyVerification { .. }
                | Self::ApplyFailed { .. }
                | Self::RollbackFailed { .. }
        )
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::StorageNotFound(err.to_string()),
            StorageError::Write { .. } => Self::StorageWrite(err.to_string()),
            StorageError::Configuration(_) | StorageError::UnsupportedDriver(_) => {
                Self::Validation(err.to_string())
            }
            StorageError::Read { .. } | StorageError::Io(_) => Self::StorageRead(err.to_string()),
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
