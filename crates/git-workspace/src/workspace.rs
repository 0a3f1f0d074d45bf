//! Version-control capability used by the supervisor

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, info};

use fixer_core::credential::{sanitize, Credential};

use crate::commands::{
    git_command, git_command_checked, git_command_with_env, is_git_repository, non_empty_lines,
};
use crate::error::{GitError, Result};

/// Operations the supervisor needs from version control
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `url` into `dest`, optionally at `branch`, returning the local path
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<PathBuf>;

    /// Create and check out a new branch at HEAD
    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Commit hash at HEAD
    async fn head_commit(&self, repo: &Path) -> Result<String>;

    /// Files differing from `baseline`, including untracked files
    async fn changed_files(&self, repo: &Path, baseline: &str) -> Result<Vec<String>>;

    /// Stage every change in the working tree
    async fn stage_all(&self, repo: &Path) -> Result<()>;

    /// Whether the index differs from HEAD
    async fn has_staged_changes(&self, repo: &Path) -> Result<bool>;

    /// Commit the index, returning the new commit hash
    async fn commit(&self, repo: &Path, message: &str) -> Result<String>;

    /// Push `branch` to origin
    async fn push(&self, repo: &Path, branch: &str, credential: Option<&Credential>) -> Result<()>;
}

/// Author/committer identity for commits made on the agent's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "issue-fixer".to_string(),
            email: "issue-fixer@users.noreply.github.com".to_string(),
        }
    }
}

/// [`VersionControl`] backed by the `git` CLI
///
/// Credentials travel as an HTTP authorization header through git's
/// environment-based config, so they never land in `.git/config`, the
/// remote URL, or the process argument list.
#[derive(Debug, Clone)]
pub struct GitCli {
    identity: CommitIdentity,
    clone_depth: Option<u32>,
}

impl GitCli {
    pub fn new(identity: CommitIdentity) -> Self {
        Self {
            identity,
            clone_depth: None,
        }
    }

    /// Shallow-clone with the given depth
    pub fn with_clone_depth(mut self, depth: Option<u32>) -> Self {
        self.clone_depth = depth;
        self
    }

    fn auth_env(credential: Option<&Credential>) -> Vec<(String, String)> {
        let Some(credential) = credential else {
            return Vec::new();
        };
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("x-access-token:{}", credential.expose()));
        vec![
            ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
            ("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()),
            (
                "GIT_CONFIG_VALUE_0".to_string(),
                format!("Authorization: Basic {}", basic),
            ),
        ]
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(CommitIdentity::default())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<PathBuf> {
        if dest.exists() {
            return Err(GitError::WorkspaceExists {
                path: dest.to_path_buf(),
            });
        }
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let depth = self.clone_depth.map(|d| d.to_string());
        let dest_str = dest.to_string_lossy();
        let mut args = vec!["clone", "--no-tags"];
        if let Some(depth) = depth.as_deref() {
            args.extend(["--depth", depth]);
        }
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend(["--", url, dest_str.as_ref()]);

        info!(
            "Cloning {} into {:?}{}",
            sanitize(url, credential),
            dest,
            branch.map(|b| format!(" at {}", b)).unwrap_or_default()
        );

        let output = git_command_with_env(parent, &args, &Self::auth_env(credential)).await?;
        if !output.success {
            return Err(GitError::CloneFailed {
                message: sanitize(output.stderr.trim(), credential),
            });
        }

        if !is_git_repository(dest).await? {
            return Err(GitError::NotAGitRepository {
                path: dest.to_path_buf(),
            });
        }

        Ok(dest.to_path_buf())
    }

    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        debug!("Creating branch {} in {:?}", branch, repo);
        git_command_checked(repo, &["checkout", "-b", branch]).await?;
        Ok(())
    }

    async fn head_commit(&self, repo: &Path) -> Result<String> {
        let output = git_command_checked(repo, &["rev-parse", "HEAD"]).await?;
        Ok(output.trim().to_string())
    }

    async fn changed_files(&self, repo: &Path, baseline: &str) -> Result<Vec<String>> {
        let tracked = git_command_checked(repo, &["diff", "--name-only", baseline]).await?;
        let untracked =
            git_command_checked(repo, &["ls-files", "--others", "--exclude-standard"]).await?;

        let files: BTreeSet<String> = non_empty_lines(&tracked)
            .chain(non_empty_lines(&untracked))
            .collect();
        Ok(files.into_iter().collect())
    }

    async fn stage_all(&self, repo: &Path) -> Result<()> {
        git_command_checked(repo, &["add", "-A"]).await?;
        Ok(())
    }

    async fn has_staged_changes(&self, repo: &Path) -> Result<bool> {
        // --quiet exits 1 when there are differences
        let output = git_command(repo, &["diff", "--cached", "--quiet"]).await?;
        Ok(!output.success)
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<String> {
        let name = format!("user.name={}", self.identity.name);
        let email = format!("user.email={}", self.identity.email);
        let output = git_command(
            repo,
            &["-c", &name, "-c", &email, "commit", "--no-verify", "-m", message],
        )
        .await?;

        if !output.success {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(GitError::CommitFailed {
                message: detail.to_string(),
            });
        }

        self.head_commit(repo).await
    }

    async fn push(&self, repo: &Path, branch: &str, credential: Option<&Credential>) -> Result<()> {
        info!("Pushing {} from {:?}", branch, repo);
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let output = git_command_with_env(
            repo,
            &["push", "--set-upstream", "origin", &refspec],
            &Self::auth_env(credential),
        )
        .await?;

        if !output.success {
            return Err(GitError::PushFailed {
                message: sanitize(output.stderr.trim(), credential),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::branch_exists;
    use crate::commands::tests::init_test_repo;
    use tempfile::TempDir;

    /// A bare "remote" seeded with one commit on main
    async fn init_remote() -> (TempDir, PathBuf) {
        let seed = init_test_repo().await;
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("origin.git");
        git_command_checked(
            dir.path(),
            &["clone", "--bare", seed.path().to_str().unwrap(), "origin.git"],
        )
        .await
        .unwrap();
        git_command_checked(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"])
            .await
            .unwrap();
        (dir, bare)
    }

    #[tokio::test]
    async fn test_clone_and_branch() {
        let (_remote_dir, bare) = init_remote().await;
        let work = TempDir::new().unwrap();
        let dest = work.path().join("pass-1");
        let git = GitCli::default();

        let path = git
            .clone_repo(bare.to_str().unwrap(), &dest, None, None)
            .await
            .unwrap();
        assert!(path.join("test.txt").exists());

        git.create_branch(&path, "fix/patcher-1-abc123").await.unwrap();
        assert!(branch_exists(&path, "fix/patcher-1-abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_clone_into_existing_dir_fails() {
        let (_remote_dir, bare) = init_remote().await;
        let work = TempDir::new().unwrap();
        let git = GitCli::default();

        let result = git
            .clone_repo(bare.to_str().unwrap(), work.path(), None, None)
            .await;
        assert!(matches!(result, Err(GitError::WorkspaceExists { .. })));
    }

    #[tokio::test]
    async fn test_clone_failure_is_sanitized() {
        let work = TempDir::new().unwrap();
        let git = GitCli::default();
        let credential = Credential::new("supersecrettoken");

        let err = git
            .clone_repo(
                "/definitely/not/a/repo",
                &work.path().join("x"),
                None,
                Some(&credential),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::CloneFailed { .. }));
        assert!(!err.to_string().contains("supersecrettoken"));
    }

    #[tokio::test]
    async fn test_changed_files_includes_untracked_and_committed() {
        let (_remote_dir, bare) = init_remote().await;
        let work = TempDir::new().unwrap();
        let git = GitCli::default();
        let path = git
            .clone_repo(bare.to_str().unwrap(), &work.path().join("c"), None, None)
            .await
            .unwrap();
        let baseline = git.head_commit(&path).await.unwrap();

        assert!(git.changed_files(&path, &baseline).await.unwrap().is_empty());

        tokio::fs::write(path.join("test.txt"), "changed").await.unwrap();
        tokio::fs::write(path.join("new.txt"), "new").await.unwrap();
        let files = git.changed_files(&path, &baseline).await.unwrap();
        assert_eq!(files, vec!["new.txt", "test.txt"]);

        // Changes the agent committed itself still count against the baseline
        git.stage_all(&path).await.unwrap();
        git.commit(&path, "agent commit").await.unwrap();
        let files = git.changed_files(&path, &baseline).await.unwrap();
        assert_eq!(files, vec!["new.txt", "test.txt"]);
        assert!(!git.has_staged_changes(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_and_push() {
        let (_remote_dir, bare) = init_remote().await;
        let work = TempDir::new().unwrap();
        let git = GitCli::new(CommitIdentity {
            name: "Bot".into(),
            email: "bot@example.com".into(),
        });
        let path = git
            .clone_repo(bare.to_str().unwrap(), &work.path().join("c"), None, None)
            .await
            .unwrap();

        git.create_branch(&path, "fix/issue-7").await.unwrap();
        tokio::fs::write(path.join("fix.txt"), "fixed").await.unwrap();
        git.stage_all(&path).await.unwrap();
        assert!(git.has_staged_changes(&path).await.unwrap());

        let commit = git.commit(&path, "Fix #7").await.unwrap();
        assert_eq!(commit.len(), 40);
        git.push(&path, "fix/issue-7", None).await.unwrap();
        assert!(branch_exists(&bare, "fix/issue-7").await.unwrap());

        let author = git_command_checked(&path, &["log", "-1", "--format=%an <%ae>"])
            .await
            .unwrap();
        assert_eq!(author.trim(), "Bot <bot@example.com>");
    }

    #[tokio::test]
    async fn test_commit_with_nothing_staged_fails() {
        let (_remote_dir, bare) = init_remote().await;
        let work = TempDir::new().unwrap();
        let git = GitCli::default();
        let path = git
            .clone_repo(bare.to_str().unwrap(), &work.path().join("c"), None, None)
            .await
            .unwrap();

        let result = git.commit(&path, "empty").await;
        assert!(matches!(result, Err(GitError::CommitFailed { .. })));
    }

    #[test]
    fn test_auth_env_hides_token_in_header() {
        let env = GitCli::auth_env(Some(&Credential::new("tok")));
        assert_eq!(env.len(), 3);
        assert!(env[2].1.starts_with("Authorization: Basic "));
        assert!(!env[2].1.contains("tok"));
        assert!(GitCli::auth_env(None).is_empty());
    }
}
