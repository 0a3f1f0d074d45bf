//! Error types for agent-runner

use thiserror::Error;

use fixer_core::run::FailureKind;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while supervising an agent pass
///
/// Only `init` returns these to callers. Inside a pass they are converted
/// into a failed `RunResult` with a sanitized message.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Agent executable is not on PATH
    #[error("Agent executable not found: {executable}")]
    AgentNotFound { executable: String },

    /// Bootstrap install command failed
    #[error("Agent bootstrap failed: {message}")]
    BootstrapFailed { message: String },

    /// Mode tag not present in the catalog
    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    /// Repository clone failed
    #[error("Clone failed: {message}")]
    CloneFailed { message: String },

    /// Failed to spawn agent process
    #[error("Failed to spawn agent process: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Commit of harvested changes failed
    #[error("Commit failed: {message}")]
    CommitFailed { message: String },

    /// Push of the produced branch failed
    #[error("Push failed: {message}")]
    PushFailed { message: String },

    /// Hosting collaborator call failed
    #[error("Hosting error: {message}")]
    Hosting { message: String },

    /// Other git operation failed
    #[error("Git error: {0}")]
    Git(#[from] git_workspace::GitError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Create a SpawnFailed error
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a SpawnFailed error with source
    pub fn spawn_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Failure category reported in a `RunResult`
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::CloneFailed { .. } => FailureKind::CloneFailure,
            Self::SpawnFailed { .. } | Self::AgentNotFound { .. } => FailureKind::SpawnFailure,
            Self::CommitFailed { .. } => FailureKind::CommitFailure,
            Self::PushFailed { .. } => FailureKind::PushFailure,
            Self::UnknownMode(_) => FailureKind::InvalidRequest,
            _ => FailureKind::Internal,
        }
    }

    /// Lifecycle stage reported in the `failed` progress event
    pub fn stage(&self) -> &'static str {
        match self {
            Self::AgentNotFound { .. } | Self::BootstrapFailed { .. } => "init",
            Self::UnknownMode(_) => "select",
            Self::CloneFailed { .. } => "clone",
            Self::SpawnFailed { .. } => "spawn",
            Self::CommitFailed { .. } => "commit",
            Self::PushFailed { .. } => "push",
            Self::Hosting { .. } => "comment",
            Self::Git(_) | Self::Io(_) => "workspace",
        }
    }
}
