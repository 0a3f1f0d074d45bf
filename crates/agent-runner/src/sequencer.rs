//! Pass sequencer: one or two ordered agent passes for an issue
//!
//! A second pass always starts from the branch the first pass pushed, so
//! the final branch contains every commit of the primary pass.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fixer_core::config::Settings;
use fixer_core::credential::{sanitize, Credential};
use fixer_core::mode::{ModeSelection, ModeSelector, ModeTag};
use fixer_core::run::{
    extract_issue_number, union_files, FailureKind, ProgressKind, ProgressReporter, RunResult,
    SequenceResult,
};

use crate::branch::chained_branch_name;
use crate::host::HostingCollaborator;
use crate::supervisor::PassRequest;

const REFINEMENT_NOTE: &str = "This is a refinement pass. A structural pass has already been \
applied on this branch; review its changes, complete anything left unfinished, and fix \
any defects it introduced. Keep the existing structure unless it is clearly wrong.";

/// Anything that can run a single pass
#[async_trait]
pub trait PassRunner: Send + Sync {
    /// Run one pass. Failures are reported in the result, never as errors.
    async fn run_pass(&self, request: PassRequest) -> RunResult;
}

/// Sequencer configuration
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Mode used when nothing else selects one
    pub default_mode: ModeTag,
    pub sequencing_enabled: bool,
}

impl SequencerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_mode: ModeTag::new(settings.default_mode.clone()),
            sequencing_enabled: settings.sequencing_enabled,
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            default_mode: ModeTag::new("patcher"),
            sequencing_enabled: true,
        }
    }
}

/// An issue to fix
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub repo_url: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// Comment command such as `/mode architect+patcher`; takes precedence over labels
    pub command: Option<String>,
    pub branch_hint: Option<String>,
    /// Branch the first pass clones
    pub base_branch: Option<String>,
    pub credential: Option<Credential>,
    pub progress: ProgressReporter,
}

impl IssueRequest {
    pub fn new(repo_url: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            title: title.into(),
            body: body.into(),
            labels: Vec::new(),
            command: None,
            branch_hint: None,
            base_branch: None,
            credential: None,
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command(mut self, command: Option<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_branch_hint(mut self, hint: Option<String>) -> Self {
        self.branch_hint = hint;
        self
    }

    pub fn with_base_branch(mut self, branch: Option<String>) -> Self {
        self.base_branch = branch;
        self
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }
}

/// Chains supervisor passes according to the selected modes
pub struct PassSequencer {
    selector: ModeSelector,
    runner: Arc<dyn PassRunner>,
    host: Arc<dyn HostingCollaborator>,
    config: SequencerConfig,
}

impl PassSequencer {
    pub fn new(
        selector: ModeSelector,
        runner: Arc<dyn PassRunner>,
        host: Arc<dyn HostingCollaborator>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            selector,
            runner,
            host,
            config,
        }
    }

    /// Resolve the mode selection for `request`
    ///
    /// An unrecognized command is an error listing the valid tokens.
    pub fn resolve(&self, request: &IssueRequest) -> std::result::Result<ModeSelection, String> {
        if let Some(command) = request.command.as_deref().filter(|c| !c.trim().is_empty()) {
            return self.selector.from_command(command).ok_or_else(|| {
                format!(
                    "Unrecognized mode command {:?}; valid modes: {}",
                    command.trim(),
                    self.selector.valid_tokens().join(", ")
                )
            });
        }

        Ok(self
            .selector
            .select(&request.title, &request.body, &request.labels)
            .unwrap_or_else(|| ModeSelection::single(self.config.default_mode.clone())))
    }

    /// Run the pass(es) for an issue
    pub async fn run(&self, request: IssueRequest) -> SequenceResult {
        let progress = request.progress.clone();

        let selection = match self.resolve(&request) {
            Ok(selection) => selection,
            Err(message) => {
                warn!("{}", message);
                progress.emit(ProgressKind::Failed {
                    stage: "select".to_string(),
                    message: message.clone(),
                });
                return SequenceResult::rejected(message);
            }
        };

        progress.emit(ProgressKind::SequenceStarted {
            modes: selection.modes().iter().map(|m| m.to_string()).collect(),
        });

        let result = match (&selection.secondary, self.config.sequencing_enabled) {
            (Some(secondary), true) if selection.needs_sequencing => {
                self.run_sequence(&request, &selection.primary, secondary).await
            }
            _ => {
                let pass = self.pass_request(&request, &selection.primary, &request.body);
                let result = self.run_single(&request, &selection.primary, 1, pass).await;
                SequenceResult::from_pass(selection.primary.clone(), result)
            }
        };

        progress.emit(ProgressKind::SequenceFinished {
            success: result.success,
        });
        result
    }

    async fn run_sequence(
        &self,
        request: &IssueRequest,
        primary: &ModeTag,
        secondary: &ModeTag,
    ) -> SequenceResult {
        info!("Running {} then {}", primary, secondary);

        let first_pass = self.pass_request(request, primary, &request.body);
        let first = self.run_single(request, primary, 1, first_pass).await;
        if !first.success {
            return SequenceResult::from_pass(primary.clone(), first);
        }
        let Some(primary_branch) = first.produced_branch.clone() else {
            return SequenceResult::from_pass(primary.clone(), first);
        };

        let comment = format!(
            "Pass 1 ({}) pushed `{}` touching {} file(s). Starting refinement pass ({}).",
            primary,
            primary_branch,
            first.touched_files.len(),
            secondary
        );
        if let Err(e) = self.host.post_progress_comment(&comment).await {
            warn!(
                "Failed to post progress comment: {}",
                sanitize(&e.to_string(), request.credential.as_ref())
            );
        }

        let issue = extract_issue_number(request.branch_hint.as_deref(), &request.title);
        let body = refinement_body(&request.body);
        let second_pass = self
            .pass_request(request, secondary, &body)
            .with_base_branch(Some(primary_branch.clone()))
            .with_target_branch(chained_branch_name(primary, secondary, issue));
        let second = self.run_single(request, secondary, 2, second_pass).await;

        let touched_files = union_files([first.touched_files, second.touched_files.clone()]);
        let modes_used = vec![primary.clone(), secondary.clone()];

        if second.success {
            SequenceResult {
                success: true,
                touched_files,
                message: format!("{} / {}", first.message, second.message),
                modes_used,
                final_branch: second.produced_branch,
                failure: None,
            }
        } else {
            SequenceResult {
                success: false,
                touched_files,
                message: format!(
                    "Refinement pass ({}) failed: {}. Changes from {} remain on {}",
                    secondary, second.message, primary, primary_branch
                ),
                modes_used,
                final_branch: Some(primary_branch),
                failure: Some(FailureKind::SecondaryPassFailure),
            }
        }
    }

    async fn run_single(
        &self,
        request: &IssueRequest,
        mode: &ModeTag,
        pass: usize,
        pass_request: PassRequest,
    ) -> RunResult {
        request.progress.emit(ProgressKind::PassStarted {
            mode: mode.to_string(),
            pass,
        });
        let result = self.runner.run_pass(pass_request).await;
        info!(
            "Pass {} ({}) finished: success={} files={}",
            pass,
            mode,
            result.success,
            result.touched_files.len()
        );
        request.progress.emit(ProgressKind::PassFinished {
            mode: mode.to_string(),
            success: result.success,
        });
        result
    }

    fn pass_request(&self, request: &IssueRequest, mode: &ModeTag, body: &str) -> PassRequest {
        PassRequest::new(&request.repo_url, &request.title, body, mode.clone())
            .with_base_branch(request.base_branch.clone())
            .with_branch_hint(request.branch_hint.clone())
            .with_credential(request.credential.clone())
            .with_progress(request.progress.clone())
    }
}

fn refinement_body(body: &str) -> String {
    if body.trim().is_empty() {
        return REFINEMENT_NOTE.to_string();
    }
    format!("{}\n\n---\n{}", body.trim_end(), REFINEMENT_NOTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SupervisorError};
    use fixer_core::mode::{ModeCatalog, SelectorConfig};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records requests and replays canned results
    struct FakeRunner {
        requests: Mutex<Vec<PassRequest>>,
        results: Mutex<VecDeque<RunResult>>,
    }

    impl FakeRunner {
        fn new(results: Vec<RunResult>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                results: Mutex::new(results.into()),
            })
        }

        fn requests(&self) -> Vec<PassRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PassRunner for FakeRunner {
        async fn run_pass(&self, request: PassRequest) -> RunResult {
            self.requests.lock().unwrap().push(request);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| RunResult::failed(FailureKind::Internal, "no canned result"))
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        comments: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl HostingCollaborator for RecordingHost {
        async fn post_progress_comment(&self, body: &str) -> Result<()> {
            self.comments.lock().unwrap().push(body.to_string());
            if self.fail {
                return Err(SupervisorError::Hosting {
                    message: "rate limited".into(),
                });
            }
            Ok(())
        }
    }

    fn sequencer(runner: Arc<FakeRunner>, host: Arc<RecordingHost>) -> PassSequencer {
        let selector = ModeSelector::new(Arc::new(ModeCatalog::builtin()), SelectorConfig::default());
        PassSequencer::new(selector, runner, host, SequencerConfig::default())
    }

    fn ok(files: &[&str], branch: &str) -> RunResult {
        RunResult::succeeded(files.iter().map(|f| f.to_string()), branch, "pushed")
    }

    fn issue() -> IssueRequest {
        IssueRequest::new("https://example.com/repo.git", "Issue #12: rework storage", "Details")
    }

    #[tokio::test]
    async fn test_single_pass_from_label() {
        let runner = FakeRunner::new(vec![ok(&["a.rs"], "fix/patcher-issue-12-aaaaaa")]);
        let seq = sequencer(runner.clone(), Arc::new(RecordingHost::default()));

        let result = seq.run(issue().with_labels(["patcher"])).await;

        assert!(result.success);
        assert_eq!(result.modes_used, vec![ModeTag::new("patcher")]);
        assert_eq!(result.final_branch.as_deref(), Some("fix/patcher-issue-12-aaaaaa"));
        let requests = runner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, ModeTag::new("patcher"));
        assert!(requests[0].target_branch.is_none());
    }

    #[tokio::test]
    async fn test_two_pass_sequence_chains_branches() {
        let runner = FakeRunner::new(vec![
            ok(&["a.rs", "b.rs"], "fix/architect-issue-12-aaaaaa"),
            ok(&["b.rs", "c.rs"], "fix/architect-then-patcher-issue-12-bbbbbb"),
        ]);
        let host = Arc::new(RecordingHost::default());
        let seq = sequencer(runner.clone(), host.clone());

        let result = seq.run(issue().with_labels(["architect", "multipass"])).await;

        assert!(result.success);
        assert_eq!(result.touched_files, vec!["a.rs", "b.rs", "c.rs"]);
        assert_eq!(
            result.modes_used,
            vec![ModeTag::new("architect"), ModeTag::new("patcher")]
        );
        assert_eq!(
            result.final_branch.as_deref(),
            Some("fix/architect-then-patcher-issue-12-bbbbbb")
        );

        let requests = runner.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].base_branch.as_deref(),
            Some("fix/architect-issue-12-aaaaaa")
        );
        let target = requests[1].target_branch.as_deref().unwrap();
        assert!(target.starts_with("fix/architect-then-patcher-issue-12-"));
        assert!(requests[1].body.starts_with("Details"));
        assert!(requests[1].body.contains("refinement pass"));
        assert_eq!(host.comments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_stops_sequence() {
        let runner = FakeRunner::new(vec![RunResult::no_changes("nothing changed")]);
        let host = Arc::new(RecordingHost::default());
        let seq = sequencer(runner.clone(), host.clone());

        let result = seq.run(issue().with_labels(["architect", "multipass"])).await;

        assert!(!result.success);
        assert_eq!(result.modes_used, vec![ModeTag::new("architect")]);
        assert_eq!(result.failure, Some(FailureKind::NoChangesProduced));
        assert_eq!(runner.requests().len(), 1);
        assert!(host.comments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secondary_failure_keeps_primary_work() {
        let runner = FakeRunner::new(vec![
            ok(&["a.rs"], "fix/architect-issue-12-aaaaaa"),
            RunResult::failed(FailureKind::Timeout, "timed out"),
        ]);
        let seq = sequencer(runner, Arc::new(RecordingHost::default()));

        let result = seq.run(issue().with_labels(["architect", "multipass"])).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::SecondaryPassFailure));
        assert_eq!(result.touched_files, vec!["a.rs"]);
        assert_eq!(result.final_branch.as_deref(), Some("fix/architect-issue-12-aaaaaa"));
        assert_eq!(result.modes_used.len(), 2);
    }

    #[tokio::test]
    async fn test_comment_failure_does_not_stop_sequence() {
        let runner = FakeRunner::new(vec![
            ok(&["a.rs"], "fix/architect-issue-12-aaaaaa"),
            ok(&["b.rs"], "fix/architect-then-patcher-issue-12-bbbbbb"),
        ]);
        let host = Arc::new(RecordingHost {
            fail: true,
            ..Default::default()
        });
        let seq = sequencer(runner.clone(), host);

        let result = seq.run(issue().with_labels(["architect", "multipass"])).await;

        assert!(result.success);
        assert_eq!(runner.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_command_selects_hybrid_mode() {
        let runner = FakeRunner::new(vec![ok(&["auth.rs"], "fix/hybrid-security-issue-12-aaaaaa")]);
        let seq = sequencer(runner.clone(), Arc::new(RecordingHost::default()));

        let result = seq
            .run(
                issue()
                    .with_labels(["architect", "multipass"])
                    .with_command(Some("/mode hybrid:security".into())),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.modes_used, vec![ModeTag::new("hybrid:security")]);
        assert_eq!(runner.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_command_explicit_sequence() {
        let runner = FakeRunner::new(vec![
            ok(&["a.rs"], "fix/architect-issue-12-aaaaaa"),
            ok(&["b.rs"], "fix/architect-then-patcher-issue-12-bbbbbb"),
        ]);
        let seq = sequencer(runner.clone(), Arc::new(RecordingHost::default()));

        let result = seq
            .run(issue().with_command(Some("/mode architect+patcher".into())))
            .await;

        assert_eq!(
            result.modes_used,
            vec![ModeTag::new("architect"), ModeTag::new("patcher")]
        );
        let modes: Vec<_> = runner.requests().into_iter().map(|r| r.mode).collect();
        assert_eq!(modes, vec![ModeTag::new("architect"), ModeTag::new("patcher")]);
    }

    #[tokio::test]
    async fn test_unrecognized_command_runs_nothing() {
        let runner = FakeRunner::new(vec![]);
        let seq = sequencer(runner.clone(), Arc::new(RecordingHost::default()));

        let result = seq
            .run(issue().with_command(Some("/mode wizard".into())))
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::InvalidRequest));
        assert!(result.message.contains("architect"));
        assert!(result.message.contains("hybrid:testing"));
        assert!(runner.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sequencing_disabled_runs_primary_only() {
        let runner = FakeRunner::new(vec![ok(&["a.rs"], "fix/architect-issue-12-aaaaaa")]);
        let selector = ModeSelector::new(Arc::new(ModeCatalog::builtin()), SelectorConfig::default());
        let config = SequencerConfig {
            sequencing_enabled: false,
            ..Default::default()
        };
        let seq = PassSequencer::new(selector, runner.clone(), Arc::new(RecordingHost::default()), config);

        let result = seq.run(issue().with_labels(["architect", "multipass"])).await;

        assert!(result.success);
        assert_eq!(result.modes_used, vec![ModeTag::new("architect")]);
        assert_eq!(runner.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_default_mode_without_selection() {
        let runner = FakeRunner::new(vec![ok(&["a.rs"], "fix/patcher-aaaaaa")]);
        let selector = ModeSelector::new(
            Arc::new(ModeCatalog::builtin()),
            SelectorConfig {
                use_content_heuristics: false,
                ..Default::default()
            },
        );
        let seq = PassSequencer::new(
            selector,
            runner.clone(),
            Arc::new(RecordingHost::default()),
            SequencerConfig::default(),
        );

        let result = seq.run(IssueRequest::new("repo", "Something", "")).await;

        assert!(result.success);
        assert_eq!(runner.requests()[0].mode, ModeTag::new("patcher"));
    }

    #[tokio::test]
    async fn test_progress_events_bracket_passes() {
        let runner = FakeRunner::new(vec![ok(&["a.rs"], "fix/patcher-issue-12-aaaaaa")]);
        let seq = sequencer(runner, Arc::new(RecordingHost::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        seq.run(
            issue()
                .with_labels(["patcher"])
                .with_progress(ProgressReporter::new(move |e| sink.lock().unwrap().push(e.name()))),
        )
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["sequence_started", "pass_started", "pass_finished", "sequence_finished"]
        );
    }

    #[test]
    fn test_refinement_body() {
        assert!(refinement_body("Original\n").starts_with("Original\n\n---\n"));
        assert_eq!(refinement_body("  "), REFINEMENT_NOTE);
    }
}
