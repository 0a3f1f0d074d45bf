//! Process supervisor: one agent pass from clone to push
//!
//! `run` never fails. Every error inside a pass becomes a `RunResult` with a
//! sanitized message; only `init` reports hard errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fixer_core::config::{AgentSettings, LivenessPolicy, Settings};
use fixer_core::credential::{sanitize, Credential};
use fixer_core::mode::{ModeCatalog, ModeTag};
use fixer_core::run::{extract_issue_number, FailureKind, ProgressKind, ProgressReporter, RunResult};
use git_workspace::VersionControl;

use crate::branch::derive_branch_name;
use crate::error::{Result, SupervisorError};
use crate::liveness::{ExitReason, LivenessMonitor, SupervisionOutcome};
use crate::process::AgentCommand;
use crate::sequencer::PassRunner;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub agent: AgentSettings,
    pub liveness: LivenessPolicy,
    /// Parent of every per-run working directory
    pub work_root: PathBuf,
    /// Leave pass directories on disk for inspection
    pub keep_workspaces: bool,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            agent: settings.agent.clone(),
            liveness: settings.liveness.clone(),
            work_root: settings.work_root.clone(),
            keep_workspaces: settings.keep_workspaces,
        }
    }
}

/// Options fixed for the lifetime of one pass
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: ModeTag,
    pub model: String,
    pub timeout: Duration,
    pub extra_args: Vec<String>,
    pub credential: Option<Credential>,
}

/// One pass to run
#[derive(Debug, Clone)]
pub struct PassRequest {
    pub repo_url: String,
    pub title: String,
    pub body: String,
    pub mode: ModeTag,
    /// Branch to produce; derived from mode and issue number when absent
    pub target_branch: Option<String>,
    /// Branch to clone; the remote default branch when absent
    pub base_branch: Option<String>,
    pub branch_hint: Option<String>,
    pub credential: Option<Credential>,
    pub extra_args: Vec<String>,
    /// Overrides the policy's hard timeout
    pub timeout: Option<Duration>,
    pub progress: ProgressReporter,
}

impl PassRequest {
    pub fn new(
        repo_url: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        mode: ModeTag,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            title: title.into(),
            body: body.into(),
            mode,
            target_branch: None,
            base_branch: None,
            branch_hint: None,
            credential: None,
            extra_args: Vec::new(),
            timeout: None,
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_target_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = Some(branch.into());
        self
    }

    pub fn with_base_branch(mut self, branch: Option<String>) -> Self {
        self.base_branch = branch;
        self
    }

    pub fn with_branch_hint(mut self, hint: Option<String>) -> Self {
        self.branch_hint = hint;
        self
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }
}

/// Runs agent passes in isolated clones
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    catalog: Arc<ModeCatalog>,
    vcs: Arc<dyn VersionControl>,
    agent_path: PathBuf,
    run_root: PathBuf,
}

impl ProcessSupervisor {
    /// Verify the agent is installed and allocate the run directory
    pub async fn init(
        config: SupervisorConfig,
        catalog: Arc<ModeCatalog>,
        vcs: Arc<dyn VersionControl>,
    ) -> Result<Self> {
        let agent_path = ensure_agent(&config.agent).await?;
        info!("Using agent at {:?}", agent_path);

        let run_root = config.work_root.join(format!("run-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&run_root).await?;
        debug!("Allocated run directory {:?}", run_root);

        Ok(Self {
            config,
            catalog,
            vcs,
            agent_path,
            run_root,
        })
    }

    /// Directory holding this supervisor's pass clones
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    /// Run one pass. Never returns an error; failures are in the result.
    pub async fn run(&self, request: PassRequest) -> RunResult {
        let started = Instant::now();
        let pass_dir = self.run_root.join(format!("pass-{}", Uuid::new_v4()));

        let result = match self.execute(&request, &pass_dir).await {
            Ok(result) => result,
            Err(e) => {
                let message = sanitize(&e.to_string(), request.credential.as_ref());
                error!("Pass {} failed at {}: {}", request.mode, e.stage(), message);
                request.progress.emit(ProgressKind::Failed {
                    stage: e.stage().to_string(),
                    message: message.clone(),
                });
                RunResult::failed(e.failure_kind(), message)
            }
        };

        if !self.config.keep_workspaces {
            if let Err(e) = tokio::fs::remove_dir_all(&pass_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove pass directory {:?}: {}", pass_dir, e);
                }
            }
        }

        result.with_duration_ms(started.elapsed().as_millis() as u64)
    }

    /// Per-pass options resolved against the catalog and settings
    pub fn options_for(&self, request: &PassRequest) -> RunOptions {
        RunOptions {
            mode: request.mode.clone(),
            model: self
                .catalog
                .model_for(&request.mode, &self.config.agent.default_model),
            timeout: request.timeout.unwrap_or(self.config.liveness.hard_timeout),
            extra_args: request.extra_args.clone(),
            credential: request.credential.clone(),
        }
    }

    async fn execute(&self, request: &PassRequest, pass_dir: &Path) -> Result<RunResult> {
        if !self.catalog.contains(request.mode.as_str()) {
            return Err(SupervisorError::UnknownMode(request.mode.to_string()));
        }
        let options = self.options_for(request);
        let progress = &request.progress;
        let credential = options.credential.as_ref();

        let repo = self
            .vcs
            .clone_repo(
                &request.repo_url,
                pass_dir,
                request.base_branch.as_deref(),
                credential,
            )
            .await
            .map_err(|e| SupervisorError::CloneFailed {
                message: e.to_string(),
            })?;
        progress.emit(ProgressKind::Cloned {
            path: repo.display().to_string(),
        });

        let issue = extract_issue_number(request.branch_hint.as_deref(), &request.title);
        let branch = request
            .target_branch
            .clone()
            .unwrap_or_else(|| derive_branch_name(&request.mode, issue));
        self.vcs.create_branch(&repo, &branch).await?;
        progress.emit(ProgressKind::BranchCreated {
            branch: branch.clone(),
            base: request.base_branch.clone(),
        });

        let baseline = self.vcs.head_commit(&repo).await?;
        let command = self.build_command(&repo, request, &options);

        let mut policy = self.config.liveness.clone();
        policy.hard_timeout = options.timeout;
        let monitor = LivenessMonitor::new(policy, progress.clone());
        let outcome = monitor.supervise(&command).await?;

        self.harvest(&repo, &baseline, &branch, issue, request, &outcome)
            .await
            .map(|result| result.with_restarts(outcome.restarts))
    }

    fn build_command(&self, repo: &Path, request: &PassRequest, options: &RunOptions) -> AgentCommand {
        let agent = &self.config.agent;
        let mut command = AgentCommand::new(self.agent_path.to_string_lossy(), repo)
            .args(self.catalog.args_for(&options.mode))
            .args(agent.extra_args.iter().cloned())
            .args(options.extra_args.iter().cloned());

        if !agent.model_flag.is_empty() {
            command = command.arg(&agent.model_flag).arg(&options.model);
        }

        let directive = self.catalog.directive_for(&options.mode).unwrap_or_default();
        let prompt = build_prompt(&directive, &request.title, &request.body);
        match &agent.prompt_flag {
            Some(flag) => command.arg(flag).arg(prompt),
            None => AgentCommand {
                stdin_prompt: Some(prompt),
                ..command
            },
        }
    }

    async fn harvest(
        &self,
        repo: &Path,
        baseline: &str,
        branch: &str,
        issue: Option<u64>,
        request: &PassRequest,
        outcome: &SupervisionOutcome,
    ) -> Result<RunResult> {
        let progress = &request.progress;
        let files = self.vcs.changed_files(repo, baseline).await?;

        if files.is_empty() {
            progress.emit(ProgressKind::NoChanges);
            let exit = describe_exit(outcome);
            let kind = outcome
                .reason
                .failure_kind()
                .unwrap_or(FailureKind::NoChangesProduced);
            info!("Pass {} produced no changes ({})", request.mode, exit);
            return Ok(RunResult::failed(
                kind,
                format!("No changes produced: agent {}", exit),
            ));
        }

        info!("Pass {} changed {} file(s)", request.mode, files.len());
        progress.emit(ProgressKind::ChangesDetected { files: files.len() });

        self.vcs.stage_all(repo).await?;
        if self.vcs.has_staged_changes(repo).await? {
            let message = commit_message(issue, &request.title, &request.mode);
            let commit = self
                .vcs
                .commit(repo, &message)
                .await
                .map_err(|e| SupervisorError::CommitFailed {
                    message: e.to_string(),
                })?;
            progress.emit(ProgressKind::Committed { commit });
        } else {
            debug!("Agent committed its own changes, nothing left to stage");
        }

        self.vcs
            .push(repo, branch, request.credential.as_ref())
            .await
            .map_err(|e| SupervisorError::PushFailed {
                message: e.to_string(),
            })?;
        progress.emit(ProgressKind::Pushed {
            branch: branch.to_string(),
        });

        let mut message = format!("Pushed {} changed file(s) to {}", files.len(), branch);
        if outcome.reason != ExitReason::Exited {
            message.push_str(&format!(" (agent {})", describe_exit(outcome)));
        }
        Ok(RunResult::succeeded(files, branch, message))
    }
}

#[async_trait]
impl PassRunner for ProcessSupervisor {
    async fn run_pass(&self, request: PassRequest) -> RunResult {
        self.run(request).await
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("agent_path", &self.agent_path)
            .field("run_root", &self.run_root)
            .finish()
    }
}

/// Locate the agent executable, running the bootstrap command once if needed
async fn ensure_agent(agent: &AgentSettings) -> Result<PathBuf> {
    if let Ok(path) = which::which(&agent.executable) {
        return Ok(path);
    }

    let Some(bootstrap) = agent.bootstrap_command.as_ref().filter(|c| !c.is_empty()) else {
        return Err(SupervisorError::AgentNotFound {
            executable: agent.executable.clone(),
        });
    };

    info!("Agent {} not found, running bootstrap {:?}", agent.executable, bootstrap);
    let output = tokio::process::Command::new(&bootstrap[0])
        .args(&bootstrap[1..])
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| SupervisorError::BootstrapFailed {
            message: format!("{}: {}", bootstrap[0], e),
        })?;

    if !output.status.success() {
        return Err(SupervisorError::BootstrapFailed {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    which::which(&agent.executable).map_err(|_| SupervisorError::AgentNotFound {
        executable: agent.executable.clone(),
    })
}

fn build_prompt(directive: &str, title: &str, body: &str) -> String {
    let mut prompt = String::new();
    if !directive.is_empty() {
        prompt.push_str(directive.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Issue: ");
    prompt.push_str(title.trim());
    if !body.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(body.trim());
    }
    prompt
}

fn commit_message(issue: Option<u64>, title: &str, mode: &ModeTag) -> String {
    let subject = match issue {
        Some(n) => format!("Fix #{}: {}", n, title.trim()),
        None => format!("Fix: {}", title.trim()),
    };
    format!("{}\n\nFix-Mode: {}", subject, mode)
}

fn describe_exit(outcome: &SupervisionOutcome) -> String {
    match (outcome.reason, outcome.exit_code) {
        (ExitReason::Exited, Some(code)) => format!("exited with code {}", code),
        (ExitReason::Exited, None) => "exited on a signal".to_string(),
        (ExitReason::TimedOut, _) => "timed out".to_string(),
        (ExitReason::MaxDurationExceeded, _) => "exceeded the maximum run duration".to_string(),
        (ExitReason::Stuck, _) => "stopped responding and was terminated".to_string(),
        (ExitReason::PromptWriteFailure, _) => {
            "was terminated after repeated prompt write failures".to_string()
        }
    }
}
