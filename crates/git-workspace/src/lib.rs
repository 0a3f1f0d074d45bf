//! Git workspace library
//!
//! This crate provides the version-control capability the supervisor
//! drives: cloning into an isolated directory, branching, diffing
//! against a baseline, committing and pushing.

mod commands;
mod error;
mod workspace;

pub use commands::{branch_exists, git_command, git_command_checked, GitOutput};
pub use error::{GitError, Result};
pub use workspace::{CommitIdentity, GitCli, VersionControl};
