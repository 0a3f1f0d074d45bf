//! Supervision loop for one agent process
//!
//! A single task owns the process, its output channel, and every timer:
//! the idle reporter, the health probe, the hard timeout, and the absolute
//! ceiling. Termination goes through one path guarded by `exit_requested`,
//! so SIGTERM is sent at most once per attempt.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fixer_core::config::LivenessPolicy;
use fixer_core::run::{FailureKind, ProgressKind, ProgressReporter};

use crate::error::Result;
use crate::process::{AgentCommand, AgentInput, OutputChunk, RunningAgent};
use crate::prompt::{is_upgrade_notice, PromptResponder};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const OUTPUT_TAIL_CHARS: usize = 4000;
const MAX_RESTARTS: u32 = 1;
const PROMPT_CARRY_LIMIT: usize = 1024;

/// Why the agent process stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Exited on its own
    Exited,
    /// Hard timeout reached
    TimedOut,
    /// Absolute ceiling reached; killed without grace
    MaxDurationExceeded,
    /// Health probes went unanswered
    Stuck,
    /// Too many consecutive prompt replies could not be written
    PromptWriteFailure,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exited => "exited",
            Self::TimedOut => "timed_out",
            Self::MaxDurationExceeded => "max_duration_exceeded",
            Self::Stuck => "stuck",
            Self::PromptWriteFailure => "prompt_write_failure",
        }
    }

    /// Failure category when nothing could be harvested
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Exited => None,
            Self::TimedOut | Self::MaxDurationExceeded => Some(FailureKind::Timeout),
            Self::Stuck => Some(FailureKind::StuckProcessTerminated),
            Self::PromptWriteFailure => Some(FailureKind::PromptWriteFailure),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything observed while supervising, across restarts
#[derive(Debug, Clone)]
pub struct SupervisionOutcome {
    pub reason: ExitReason,
    pub exit_code: Option<i32>,
    pub restarts: u32,
    pub terminate_signals: u32,
    pub forced_kill: bool,
    pub prompts_answered: u32,
    /// Last few thousand characters of combined output
    pub output_tail: String,
    pub elapsed: Duration,
}

impl SupervisionOutcome {
    pub fn exited_cleanly(&self) -> bool {
        self.reason == ExitReason::Exited && self.exit_code == Some(0)
    }
}

#[derive(Debug)]
struct ProcessState {
    last_activity: Instant,
    consecutive_stale_checks: u32,
    exit_requested: bool,
    exit_reason: ExitReason,
    idle_reported: bool,
    write_failures: u32,
    upgrade_requested: bool,
    kill_at: Option<Instant>,
    /// Unterminated last line of output not yet matched as a prompt
    prompt_carry: String,
}

impl ProcessState {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            consecutive_stale_checks: 0,
            exit_requested: false,
            exit_reason: ExitReason::Exited,
            idle_reported: false,
            write_failures: 0,
            upgrade_requested: false,
            kill_at: None,
            prompt_carry: String::new(),
        }
    }

    fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.consecutive_stale_checks = 0;
        self.idle_reported = false;
    }
}

#[derive(Debug, Default)]
struct Totals {
    terminate_signals: u32,
    forced_kill: bool,
    prompts_answered: u32,
    tail: OutputTail,
}

/// Bounded buffer keeping the most recent output
#[derive(Debug, Default)]
struct OutputTail {
    buf: String,
}

impl OutputTail {
    fn push(&mut self, text: &str) {
        self.buf.push_str(text);
        if self.buf.len() > OUTPUT_TAIL_CHARS * 2 {
            self.trim();
        }
    }

    fn trim(&mut self) {
        if self.buf.len() <= OUTPUT_TAIL_CHARS {
            return;
        }
        let mut cut = self.buf.len() - OUTPUT_TAIL_CHARS;
        while !self.buf.is_char_boundary(cut) {
            cut += 1;
        }
        self.buf.drain(..cut);
    }

    fn into_string(mut self) -> String {
        self.trim();
        self.buf
    }
}

struct AttemptEnd {
    reason: ExitReason,
    exit_code: Option<i32>,
    upgrade_requested: bool,
}

/// Drives an agent process to completion under a `LivenessPolicy`
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    policy: LivenessPolicy,
    responder: PromptResponder,
    progress: ProgressReporter,
}

impl LivenessMonitor {
    pub fn new(policy: LivenessPolicy, progress: ProgressReporter) -> Self {
        Self {
            policy,
            responder: PromptResponder::standard(),
            progress,
        }
    }

    /// Run `command` until it exits or is terminated
    ///
    /// A self-upgrade notice followed by a voluntary exit restarts the agent
    /// once with the same command. Both deadlines count from the first spawn.
    pub async fn supervise(&self, command: &AgentCommand) -> Result<SupervisionOutcome> {
        let started = Instant::now();
        let hard_deadline = started + self.policy.hard_timeout;
        let absolute_deadline = started + self.policy.absolute_max;
        let mut totals = Totals::default();
        let mut restarts = 0;

        loop {
            let mut agent = RunningAgent::spawn(command)?;
            self.progress.emit(ProgressKind::AgentStarted {
                pid: agent.pid(),
                attempt: restarts + 1,
            });

            if let Some(prompt) = &command.stdin_prompt {
                if let Err(e) = agent.input.send_line(prompt).await {
                    warn!("Failed to write prompt to agent stdin: {}", e);
                }
            }

            let end = self
                .watch(&mut agent, hard_deadline, absolute_deadline, &mut totals)
                .await?;

            self.progress.emit(ProgressKind::AgentExited {
                outcome: end.reason.as_str().to_string(),
                code: end.exit_code,
            });

            let can_restart = end.reason == ExitReason::Exited
                && end.upgrade_requested
                && restarts < MAX_RESTARTS
                && Instant::now() < hard_deadline;

            if can_restart {
                restarts += 1;
                info!("Agent upgraded itself, restarting (attempt {})", restarts + 1);
                self.progress.emit(ProgressKind::AgentRestarting {
                    reason: "agent reported a version upgrade".to_string(),
                });
                continue;
            }

            return Ok(SupervisionOutcome {
                reason: end.reason,
                exit_code: end.exit_code,
                restarts,
                terminate_signals: totals.terminate_signals,
                forced_kill: totals.forced_kill,
                prompts_answered: totals.prompts_answered,
                output_tail: totals.tail.into_string(),
                elapsed: started.elapsed(),
            });
        }
    }

    async fn watch(
        &self,
        agent: &mut RunningAgent,
        hard_deadline: Instant,
        absolute_deadline: Instant,
        totals: &mut Totals,
    ) -> Result<AttemptEnd> {
        let mut state = ProcessState::new();
        let input = agent.input.clone();
        let mut output = agent.take_output();
        let mut output_open = output.is_some();

        let mut check = tokio::time::interval_at(
            Instant::now() + self.policy.check_interval,
            self.policy.check_interval,
        );
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let hard = sleep_until(hard_deadline);
        tokio::pin!(hard);
        let absolute = sleep_until(absolute_deadline);
        tokio::pin!(absolute);
        let mut absolute_fired = false;

        let status = loop {
            let kill_at = state.kill_at;
            tokio::select! {
                status = agent.wait() => break status?,

                chunk = recv_chunk(&mut output), if output_open => match chunk {
                    Some(chunk) => {
                        if self.on_output(&input, &chunk, &mut state, totals).await {
                            self.request_exit(agent, &mut state, totals, ExitReason::PromptWriteFailure);
                        }
                    }
                    None => output_open = false,
                },

                _ = check.tick() => {
                    if self.on_check(&input, &mut state).await {
                        self.request_exit(agent, &mut state, totals, ExitReason::Stuck);
                    }
                }

                _ = &mut hard, if !state.exit_requested => {
                    warn!("Agent exceeded hard timeout of {:?}", self.policy.hard_timeout);
                    self.request_exit(agent, &mut state, totals, ExitReason::TimedOut);
                }

                _ = &mut absolute, if !absolute_fired => {
                    absolute_fired = true;
                    warn!("Agent exceeded absolute ceiling of {:?}, killing", self.policy.absolute_max);
                    if !state.exit_requested {
                        state.exit_requested = true;
                        state.exit_reason = ExitReason::MaxDurationExceeded;
                    }
                    force_kill(agent, &mut state, totals);
                }

                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    warn!("Agent still alive after {:?} grace, killing", self.policy.termination_grace);
                    force_kill(agent, &mut state, totals);
                }
            }
        };

        if output_open {
            let drain = async {
                while let Some(chunk) = recv_chunk(&mut output).await {
                    totals.tail.push(&chunk.text);
                    if is_upgrade_notice(&chunk.text) {
                        state.upgrade_requested = true;
                    }
                }
            };
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
                debug!("Output still open after agent exit, abandoning readers");
            }
        }
        agent.abort_readers();

        info!(
            "Agent exited ({}) with status {:?}",
            state.exit_reason,
            status.code()
        );

        Ok(AttemptEnd {
            reason: state.exit_reason,
            exit_code: status.code(),
            upgrade_requested: state.upgrade_requested,
        })
    }

    /// Handle one output chunk. Returns true when write failures call for termination.
    async fn on_output(
        &self,
        input: &AgentInput,
        chunk: &OutputChunk,
        state: &mut ProcessState,
        totals: &mut Totals,
    ) -> bool {
        state.record_activity();
        totals.tail.push(&chunk.text);

        // A prompt may arrive split across reads
        let mut window = std::mem::take(&mut state.prompt_carry);
        window.push_str(&chunk.text);

        if is_upgrade_notice(&window) {
            info!("Agent reported a self-upgrade");
            state.upgrade_requested = true;
        }

        if state.exit_requested {
            return false;
        }

        let Some(reply) = self.responder.respond(&window) else {
            state.prompt_carry = last_line(&window).to_string();
            return false;
        };

        let written = tokio::time::timeout(WRITE_TIMEOUT, input.send_line(reply.text)).await;
        match written {
            Ok(Ok(())) => {
                debug!("Answered prompt via {} with {:?}", reply.rule, reply.text);
                state.write_failures = 0;
                totals.prompts_answered += 1;
                self.progress.emit(ProgressKind::PromptAnswered {
                    rule: reply.rule.to_string(),
                    reply: reply.text.to_string(),
                });
                false
            }
            Ok(Err(e)) => {
                state.write_failures += 1;
                warn!(
                    "Failed to answer prompt via {} ({}/{}): {}",
                    reply.rule, state.write_failures, self.policy.max_write_failures, e
                );
                state.write_failures >= self.policy.max_write_failures
            }
            Err(_) => {
                state.write_failures += 1;
                warn!(
                    "Timed out answering prompt via {} ({}/{})",
                    reply.rule, state.write_failures, self.policy.max_write_failures
                );
                state.write_failures >= self.policy.max_write_failures
            }
        }
    }

    /// Periodic idle and health check. Returns true when the agent is stuck.
    async fn on_check(&self, input: &AgentInput, state: &mut ProcessState) -> bool {
        if state.exit_requested {
            return false;
        }

        let idle = state.last_activity.elapsed();

        if idle >= self.policy.activity_threshold && !state.idle_reported {
            state.idle_reported = true;
            self.progress.emit(ProgressKind::AgentIdle {
                idle_secs: idle.as_secs(),
            });
        }

        if idle < self.policy.health_threshold {
            return false;
        }

        if state.consecutive_stale_checks >= self.policy.max_stale_probes {
            warn!(
                "Agent idle for {:?} after {} unanswered probes",
                idle, state.consecutive_stale_checks
            );
            return true;
        }

        state.consecutive_stale_checks += 1;
        self.progress.emit(ProgressKind::HealthProbe {
            probe: state.consecutive_stale_checks,
        });
        let probe = tokio::time::timeout(WRITE_TIMEOUT, input.send_line(&self.policy.probe_input));
        match probe.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Health probe write failed: {}", e),
            Err(_) => debug!("Health probe write timed out"),
        }
        false
    }

    fn request_exit(
        &self,
        agent: &mut RunningAgent,
        state: &mut ProcessState,
        totals: &mut Totals,
        reason: ExitReason,
    ) {
        if state.exit_requested {
            return;
        }
        state.exit_requested = true;
        state.exit_reason = reason;
        state.kill_at = Some(Instant::now() + self.policy.termination_grace);

        info!("Terminating agent: {}", reason);
        self.progress.emit(ProgressKind::AgentTerminating {
            reason: reason.as_str().to_string(),
        });

        totals.terminate_signals += 1;
        if let Err(e) = agent.terminate() {
            warn!("Failed to signal agent: {}", e);
        }
    }
}

/// Trailing unterminated line of `text`, capped at `PROMPT_CARRY_LIMIT` bytes
fn last_line(text: &str) -> &str {
    let line = match text.rfind('\n') {
        Some(pos) => &text[pos + 1..],
        None => text,
    };
    if line.len() <= PROMPT_CARRY_LIMIT {
        return line;
    }
    let mut cut = line.len() - PROMPT_CARRY_LIMIT;
    while !line.is_char_boundary(cut) {
        cut += 1;
    }
    &line[cut..]
}

fn force_kill(agent: &mut RunningAgent, state: &mut ProcessState, totals: &mut Totals) {
    state.kill_at = None;
    if totals.forced_kill {
        return;
    }
    totals.forced_kill = true;
    if let Err(e) = agent.kill() {
        warn!("Failed to kill agent: {}", e);
    }
}

async fn recv_chunk(output: &mut Option<mpsc::Receiver<OutputChunk>>) -> Option<OutputChunk> {
    match output {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
