//! Results returned by a pass and by a sequence of passes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::mode::ModeTag;

/// Why a run did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CloneFailure,
    SpawnFailure,
    PromptWriteFailure,
    Timeout,
    StuckProcessTerminated,
    /// Negative result, not an error: the agent changed nothing
    NoChangesProduced,
    CommitFailure,
    PushFailure,
    /// A sequence's second pass failed after the first succeeded
    SecondaryPassFailure,
    /// Selection or setup problem before any pass ran
    InvalidRequest,
    Internal,
}

/// Outcome of one supervised agent pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    /// Sorted, unique repository-relative paths
    pub touched_files: Vec<String>,
    pub message: String,
    pub produced_branch: Option<String>,
    pub failure: Option<FailureKind>,
    /// Restarts after an agent self-upgrade
    pub restarts: u32,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn succeeded(
        touched_files: impl IntoIterator<Item = String>,
        branch: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            touched_files: dedup_sorted(touched_files),
            message: message.into(),
            produced_branch: Some(branch.into()),
            failure: None,
            restarts: 0,
            duration_ms: 0,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            touched_files: Vec::new(),
            message: message.into(),
            produced_branch: None,
            failure: Some(kind),
            restarts: 0,
            duration_ms: 0,
        }
    }

    pub fn no_changes(message: impl Into<String>) -> Self {
        Self::failed(FailureKind::NoChangesProduced, message)
    }

    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Aggregated outcome of a one- or two-pass sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceResult {
    pub success: bool,
    pub touched_files: Vec<String>,
    pub message: String,
    pub modes_used: Vec<ModeTag>,
    pub final_branch: Option<String>,
    pub failure: Option<FailureKind>,
}

impl SequenceResult {
    /// Wrap a single pass
    pub fn from_pass(mode: ModeTag, result: RunResult) -> Self {
        Self {
            success: result.success,
            touched_files: result.touched_files,
            message: result.message,
            modes_used: vec![mode],
            final_branch: result.produced_branch,
            failure: result.failure,
        }
    }

    /// Failure before any pass ran
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            touched_files: Vec::new(),
            message: message.into(),
            modes_used: Vec::new(),
            final_branch: None,
            failure: Some(FailureKind::InvalidRequest),
        }
    }
}

/// Sorted union of any number of path lists
pub fn union_files<I, J>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = J>,
    J: IntoIterator<Item = String>,
{
    dedup_sorted(lists.into_iter().flatten())
}

fn dedup_sorted(files: impl IntoIterator<Item = String>) -> Vec<String> {
    files.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
