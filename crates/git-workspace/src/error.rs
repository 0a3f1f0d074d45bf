//! Error types for git workspace operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for git operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors that can occur during git operations
///
/// Messages are sanitized before construction and never carry credentials.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command execution failed
    #[error("Git command failed: {message}")]
    GitCommandFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Clone failed
    #[error("Clone failed: {message}")]
    CloneFailed { message: String },

    /// Destination for a clone already exists
    #[error("Workspace already exists at {path}")]
    WorkspaceExists { path: PathBuf },

    /// Not a git repository
    #[error("Not a git repository: {path}")]
    NotAGitRepository { path: PathBuf },

    /// Commit failed
    #[error("Commit failed: {message}")]
    CommitFailed { message: String },

    /// Push failed
    #[error("Push failed: {message}")]
    PushFailed { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Create a GitCommandFailed error
    pub fn git_failed(message: impl Into<String>) -> Self {
        Self::GitCommandFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a GitCommandFailed error with source
    pub fn git_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::GitCommandFailed {
            message: message.into(),
            source: Some(source),
        }
    }
}
