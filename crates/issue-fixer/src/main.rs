//! Issue fixer command line entry point
//!
//! Loads settings from `FIXER_*` environment variables, runs the pass
//! sequencer for one issue, and prints the `SequenceResult` as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_runner::{
    IssueRequest, LogHost, PassSequencer, ProcessSupervisor, SequencerConfig, SupervisorConfig,
};
use fixer_core::config::Settings;
use fixer_core::credential::{CredentialProvider, EnvCredentialProvider};
use fixer_core::mode::{ModeCatalog, ModeOverrides, ModeSelector};
use fixer_core::run::{ProgressReporter, SequenceResult};
use git_workspace::{CommitIdentity, GitCli};

#[derive(Parser, Debug)]
#[command(
    name = "issue-fixer",
    version,
    about = "Run a coding agent against an issue and push the fix to a branch"
)]
struct Cli {
    /// Repository URL or local path to clone
    #[arg(long)]
    repo: String,

    /// Issue title
    #[arg(long)]
    title: String,

    /// Issue body
    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,

    /// Read the issue body from a file
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// Issue label; repeat for several
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Mode command, e.g. "/mode architect+patcher"
    #[arg(long)]
    command: Option<String>,

    /// Branch-name hint carrying the issue number, e.g. "issue-42"
    #[arg(long)]
    branch_hint: Option<String>,

    /// Branch to start from instead of the remote default
    #[arg(long)]
    base: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "issue_fixer=info,agent_runner=info,git_workspace=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to serialize result: {}", e),
            }
            if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<SequenceResult> {
    let settings = Settings::from_env().context("load settings")?;
    debug!(?settings, "Loaded settings");

    let mut catalog = ModeCatalog::builtin();
    if let Some(path) = &settings.overrides_path {
        let overrides = ModeOverrides::from_path(path)
            .with_context(|| format!("load mode overrides from {}", path.display()))?;
        info!("Loaded mode overrides from {:?}", path);
        catalog = catalog.with_overrides(overrides);
    }
    catalog
        .require(&settings.default_mode)
        .context("check FIXER_DEFAULT_MODE")?;
    let catalog = Arc::new(catalog);

    let credential = EnvCredentialProvider::new(settings.credential_env.clone())
        .credential()
        .await
        .context("read credential")?;
    if credential.is_none() {
        info!("No credential in {}, using anonymous git access", settings.credential_env);
    }

    let vcs = GitCli::new(CommitIdentity {
        name: settings.commit_author_name.clone(),
        email: settings.commit_author_email.clone(),
    })
    .with_clone_depth(settings.clone_depth);

    let supervisor = ProcessSupervisor::init(
        SupervisorConfig::from_settings(&settings),
        Arc::clone(&catalog),
        Arc::new(vcs),
    )
    .await
    .context("initialize supervisor")?;

    let selector = ModeSelector::new(catalog, settings.selector_config());
    let sequencer = PassSequencer::new(
        selector,
        Arc::new(supervisor),
        Arc::new(LogHost),
        SequencerConfig::from_settings(&settings),
    );

    let body = match (cli.body, cli.body_file) {
        (Some(body), _) => body,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read issue body from {}", path.display()))?,
        (None, None) => String::new(),
    };

    let progress = ProgressReporter::new(|event| {
        info!(event = event.name(), "{:?}", event.kind);
    });

    let request = IssueRequest::new(cli.repo, cli.title, body)
        .with_labels(cli.labels)
        .with_command(cli.command)
        .with_branch_hint(cli.branch_hint)
        .with_base_branch(cli.base)
        .with_credential(credential)
        .with_progress(progress);

    Ok(sequencer.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_repeated_labels() {
        let cli = Cli::try_parse_from([
            "issue-fixer",
            "--repo",
            "https://example.com/r.git",
            "--title",
            "Crash",
            "--label",
            "architect",
            "--label",
            "multipass",
        ])
        .unwrap();
        assert_eq!(cli.labels, vec!["architect", "multipass"]);
        assert!(cli.body.is_none());
    }

    #[test]
    fn test_cli_rejects_body_and_body_file() {
        let result = Cli::try_parse_from([
            "issue-fixer",
            "--repo",
            "r",
            "--title",
            "t",
            "--body",
            "b",
            "--body-file",
            "f.md",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_repo_and_title() {
        assert!(Cli::try_parse_from(["issue-fixer", "--title", "t"]).is_err());
    }
}
