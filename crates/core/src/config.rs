//! Settings loaded once at startup
//!
//! Everything here is read from `FIXER_*` environment variables (or an
//! injected lookup in tests) and then passed by value into the selector,
//! supervisor and sequencer constructors.

use std::path::PathBuf;
use std::time::Duration;

use crate::mode::{HeuristicWeights, SelectorConfig};
use crate::{Error, Result};

/// Timer policy for one supervised agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Inactivity after which a progress event is emitted
    pub activity_threshold: Duration,
    /// Inactivity after which a probe keystroke is written
    pub health_threshold: Duration,
    /// Tick period for the activity and health timers
    pub check_interval: Duration,
    /// Consecutive unanswered probes before termination
    pub max_stale_probes: u32,
    /// Wait between the terminate request and the forced kill
    pub termination_grace: Duration,
    /// Configurable hard timeout
    pub hard_timeout: Duration,
    /// Fixed ceiling regardless of the hard timeout
    pub absolute_max: Duration,
    /// Consecutive stdin write failures before termination
    pub max_write_failures: u32,
    /// Keystroke written as a health probe
    pub probe_input: String,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            activity_threshold: Duration::from_secs(60),
            health_threshold: Duration::from_secs(180),
            check_interval: Duration::from_secs(15),
            max_stale_probes: 3,
            termination_grace: Duration::from_secs(10),
            hard_timeout: Duration::from_secs(30 * 60),
            absolute_max: Duration::from_secs(60 * 60),
            max_write_failures: 3,
            probe_input: "\n".to_string(),
        }
    }
}

/// How to launch the agent executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub executable: String,
    /// Install command run by `init` when the executable is missing
    pub bootstrap_command: Option<Vec<String>>,
    /// Flag carrying the prompt; `None` writes the prompt to stdin instead
    pub prompt_flag: Option<String>,
    pub model_flag: String,
    pub default_model: String,
    pub extra_args: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            executable: "aider".to_string(),
            bootstrap_command: None,
            prompt_flag: Some("--message".to_string()),
            model_flag: "--model".to_string(),
            default_model: "sonnet".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub agent: AgentSettings,
    pub liveness: LivenessPolicy,
    /// Directory under which per-invocation workspaces are allocated
    pub work_root: PathBuf,
    pub keep_workspaces: bool,
    pub default_mode: String,
    pub sequencing_enabled: bool,
    pub sequencing_labels: Vec<String>,
    pub content_heuristics: bool,
    pub heuristic_weights: HeuristicWeights,
    /// Shallow clone depth; `None` clones full history
    pub clone_depth: Option<u32>,
    pub commit_author_name: String,
    pub commit_author_email: String,
    pub overrides_path: Option<PathBuf>,
    /// Environment variable holding the hosting token
    pub credential_env: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent: AgentSettings::default(),
            liveness: LivenessPolicy::default(),
            work_root: std::env::temp_dir().join("issue-fixer"),
            keep_workspaces: false,
            default_mode: "patcher".to_string(),
            sequencing_enabled: true,
            sequencing_labels: vec!["multipass".to_string()],
            content_heuristics: true,
            heuristic_weights: HeuristicWeights::default(),
            clone_depth: Some(1),
            commit_author_name: "issue-fixer".to_string(),
            commit_author_email: "issue-fixer@users.noreply.github.com".to_string(),
            overrides_path: None,
            credential_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl Settings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(exe) = get("FIXER_AGENT").filter(|v| !v.is_empty()) {
            settings.agent.executable = exe;
        }
        if let Some(cmd) = get("FIXER_AGENT_BOOTSTRAP") {
            let parts: Vec<String> = cmd.split_whitespace().map(String::from).collect();
            settings.agent.bootstrap_command = (!parts.is_empty()).then_some(parts);
        }
        if let Some(flag) = get("FIXER_PROMPT_FLAG") {
            settings.agent.prompt_flag = (!flag.is_empty()).then_some(flag);
        }
        if let Some(model) = get("FIXER_MODEL").filter(|v| !v.is_empty()) {
            settings.agent.default_model = model;
        }
        if let Some(args) = get("FIXER_AGENT_ARGS") {
            settings.agent.extra_args = args.split_whitespace().map(String::from).collect();
        }

        let liveness = &mut settings.liveness;
        if let Some(v) = get("FIXER_ACTIVITY_SECS") {
            liveness.activity_threshold = parse_secs("FIXER_ACTIVITY_SECS", &v)?;
        }
        if let Some(v) = get("FIXER_HEALTH_SECS") {
            liveness.health_threshold = parse_secs("FIXER_HEALTH_SECS", &v)?;
        }
        if let Some(v) = get("FIXER_CHECK_INTERVAL_SECS") {
            liveness.check_interval = parse_secs("FIXER_CHECK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("FIXER_MAX_STALE_PROBES") {
            liveness.max_stale_probes = parse_num("FIXER_MAX_STALE_PROBES", &v)?;
        }
        if let Some(v) = get("FIXER_GRACE_SECS") {
            liveness.termination_grace = parse_secs("FIXER_GRACE_SECS", &v)?;
        }
        if let Some(v) = get("FIXER_TIMEOUT_SECS") {
            liveness.hard_timeout = parse_secs("FIXER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("FIXER_MAX_DURATION_SECS") {
            liveness.absolute_max = parse_secs("FIXER_MAX_DURATION_SECS", &v)?;
        }

        if let Some(dir) = get("FIXER_WORK_DIR").filter(|v| !v.is_empty()) {
            settings.work_root = PathBuf::from(dir);
        }
        settings.keep_workspaces = env_flag(get("FIXER_KEEP_WORKSPACES"), settings.keep_workspaces);
        if let Some(mode) = get("FIXER_DEFAULT_MODE").filter(|v| !v.is_empty()) {
            settings.default_mode = mode;
        }
        settings.sequencing_enabled = env_flag(get("FIXER_SEQUENCING"), settings.sequencing_enabled);
        if let Some(labels) = get("FIXER_SEQUENCE_LABELS") {
            settings.sequencing_labels = labels
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
        }
        settings.content_heuristics =
            env_flag(get("FIXER_CONTENT_HEURISTICS"), settings.content_heuristics);
        if let Some(v) = get("FIXER_HEURISTIC_ARCH_WEIGHT") {
            settings.heuristic_weights.architectural_weight =
                parse_num("FIXER_HEURISTIC_ARCH_WEIGHT", &v)?;
        }
        if let Some(v) = get("FIXER_HEURISTIC_THRESHOLD") {
            settings.heuristic_weights.sequence_threshold =
                parse_num("FIXER_HEURISTIC_THRESHOLD", &v)?;
        }
        if let Some(v) = get("FIXER_CLONE_DEPTH") {
            let depth: u32 = parse_num("FIXER_CLONE_DEPTH", &v)?;
            settings.clone_depth = (depth > 0).then_some(depth);
        }
        if let Some(name) = get("FIXER_GIT_AUTHOR_NAME").filter(|v| !v.is_empty()) {
            settings.commit_author_name = name;
        }
        if let Some(email) = get("FIXER_GIT_AUTHOR_EMAIL").filter(|v| !v.is_empty()) {
            settings.commit_author_email = email;
        }
        if let Some(path) = get("FIXER_MODE_OVERRIDES").filter(|v| !v.is_empty()) {
            settings.overrides_path = Some(PathBuf::from(path));
        }
        if let Some(var) = get("FIXER_TOKEN_VAR").filter(|v| !v.is_empty()) {
            settings.credential_env = var;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.liveness.check_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "check interval must be greater than zero".into(),
            ));
        }
        if self.liveness.max_stale_probes == 0 {
            return Err(Error::InvalidConfig(
                "max stale probes must be at least 1".into(),
            ));
        }
        if self.liveness.hard_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "hard timeout must be greater than zero".into(),
            ));
        }
        if self.liveness.absolute_max < self.liveness.hard_timeout {
            return Err(Error::InvalidConfig(
                "absolute ceiling must not be shorter than the hard timeout".into(),
            ));
        }
        if self.agent.executable.trim().is_empty() {
            return Err(Error::InvalidConfig("agent executable is empty".into()));
        }
        Ok(())
    }

    /// Selector configuration derived from these settings
    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            sequencing_labels: self.sequencing_labels.clone(),
            use_content_heuristics: self.content_heuristics,
            weights: self.heuristic_weights,
        }
    }
}

fn env_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} must be a number, got {:?}", key, value)))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    parse_num::<u64>(key, value).map(Duration::from_secs)
}
