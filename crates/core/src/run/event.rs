//! Progress events fired at each pass and sequence transition

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tagged progress payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressKind {
    SequenceStarted { modes: Vec<String> },
    PassStarted { mode: String, pass: usize },
    Cloned { path: String },
    BranchCreated { branch: String, base: Option<String> },
    AgentStarted { pid: Option<u32>, attempt: u32 },
    AgentIdle { idle_secs: u64 },
    HealthProbe { probe: u32 },
    PromptAnswered { rule: String, reply: String },
    AgentTerminating { reason: String },
    AgentRestarting { reason: String },
    AgentExited { outcome: String, code: Option<i32> },
    ChangesDetected { files: usize },
    NoChanges,
    Committed { commit: String },
    Pushed { branch: String },
    PassFinished { mode: String, success: bool },
    SequenceFinished { success: bool },
    Failed { stage: String, message: String },
}

/// Progress event with timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The event tag, e.g. `agent_idle`
    pub fn name(&self) -> &'static str {
        match self.kind {
            ProgressKind::SequenceStarted { .. } => "sequence_started",
            ProgressKind::PassStarted { .. } => "pass_started",
            ProgressKind::Cloned { .. } => "cloned",
            ProgressKind::BranchCreated { .. } => "branch_created",
            ProgressKind::AgentStarted { .. } => "agent_started",
            ProgressKind::AgentIdle { .. } => "agent_idle",
            ProgressKind::HealthProbe { .. } => "health_probe",
            ProgressKind::PromptAnswered { .. } => "prompt_answered",
            ProgressKind::AgentTerminating { .. } => "agent_terminating",
            ProgressKind::AgentRestarting { .. } => "agent_restarting",
            ProgressKind::AgentExited { .. } => "agent_exited",
            ProgressKind::ChangesDetected { .. } => "changes_detected",
            ProgressKind::NoChanges => "no_changes",
            ProgressKind::Committed { .. } => "committed",
            ProgressKind::Pushed { .. } => "pushed",
            ProgressKind::PassFinished { .. } => "pass_finished",
            ProgressKind::SequenceFinished { .. } => "sequence_finished",
            ProgressKind::Failed { .. } => "failed",
        }
    }
}

type Callback = dyn Fn(ProgressEvent) + Send + Sync;

/// Best-effort progress callback
///
/// The callback runs inline and must not block. A panicking callback is
/// logged and otherwise ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<Arc<Callback>>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A reporter that drops every event
    pub fn noop() -> Self {
        Self { callback: None }
    }

    pub fn emit(&self, kind: ProgressKind) {
        let Some(callback) = &self.callback else {
            return;
        };
        let event = ProgressEvent::new(kind);
        let name = event.name();
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!("Progress callback panicked on {}", name);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_collects_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |event| {
            sink.lock().unwrap().push(event.name());
        });

        reporter.emit(ProgressKind::NoChanges);
        reporter.emit(ProgressKind::AgentIdle { idle_secs: 5 });

        assert_eq!(*seen.lock().unwrap(), vec!["no_changes", "agent_idle"]);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let reporter = ProgressReporter::new(|_| panic!("boom"));
        reporter.emit(ProgressKind::NoChanges);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ProgressEvent::new(ProgressKind::Pushed {
            branch: "fix/patcher".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "pushed");
        assert_eq!(json["branch"], "fix/patcher");
        assert!(json.get("timestamp").is_some());
    }
}
