//! Run module
//!
//! Results, progress events and issue references shared by the
//! supervisor and the sequencer.

mod event;
mod issue;
mod result;

pub use event::{ProgressEvent, ProgressKind, ProgressReporter};
pub use issue::extract_issue_number;
pub use result::{union_files, FailureKind, RunResult, SequenceResult};
