//! Agent Runner - supervision of interactive coding agents
//!
//! This crate runs an external code-modification agent as a subprocess in
//! an isolated clone, answers its confirmation prompts, watches it for
//! stalls, harvests its changes onto a branch, and chains passes for
//! issues that need a structural pass followed by a refinement pass.

mod branch;
mod error;
mod host;
mod liveness;
mod process;
mod prompt;
mod sequencer;
mod supervisor;

pub use branch::{chained_branch_name, derive_branch_name, disambiguator};
pub use error::{Result, SupervisorError};
pub use host::{HostingCollaborator, LogHost};
pub use liveness::{ExitReason, LivenessMonitor, SupervisionOutcome};
pub use process::{AgentCommand, AgentInput, OutputChunk, OutputStream, RunningAgent};
pub use prompt::{is_upgrade_notice, PromptReply, PromptResponder};
pub use sequencer::{IssueRequest, PassRunner, PassSequencer, SequencerConfig};
pub use supervisor::{PassRequest, ProcessSupervisor, RunOptions, SupervisorConfig};
