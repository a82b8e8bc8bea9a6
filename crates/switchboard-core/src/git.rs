//! Git integration: listing remote tags and cloning a pinned ref.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::process::{CommandLine, CommandRunner, ExecutionContext};

/// A clone of `url` into `dest` (relative to the context's working directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    /// Tag or branch to check out. `None` clones the default branch.
    pub git_ref: Option<String>,
    pub dest: PathBuf,
    /// Also fetch submodules.
    pub recursive: bool,
}

/// Version-control operations the orchestrator needs.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Tags of the remote repository, in the order the remote reports them.
    async fn list_remote_tags(&self, ctx: &ExecutionContext, url: &str) -> Result<Vec<String>>;

    /// Clone and return the path of the new working copy.
    async fn clone_repo(&self, ctx: &ExecutionContext, request: &CloneRequest) -> Result<PathBuf>;

    /// Check out `git_ref` in the working copy at `repo_dir`.
    async fn checkout(&self, ctx: &ExecutionContext, repo_dir: &Path, git_ref: &str) -> Result<()>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Clone)]
pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
}

impl GitClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl VersionControl for GitClient {
    async fn list_remote_tags(&self, ctx: &ExecutionContext, url: &str) -> Result<Vec<String>> {
        let command = CommandLine::new(["git", "ls-remote", "--tags", "--refs", url]);
        let stdout = self.runner.capture(ctx, &command).await?;
        Ok(parse_ls_remote_tags(&stdout))
    }

    async fn clone_repo(&self, ctx: &ExecutionContext, request: &CloneRequest) -> Result<PathBuf> {
        let mut command = CommandLine::new(["git", "clone"]);
        if let Some(git_ref) = &request.git_ref {
            // Shallow clones are single-branch.
            command = command.arg("-b").arg(git_ref.as_str()).arg("--depth=1");
        }
        if request.recursive {
            command = command.arg("--recurse-submodules");
            if request.git_ref.is_some() {
                command = command.arg("--shallow-submodules");
            }
        }
        command = command
            .arg(request.url.as_str())
            .arg(request.dest.to_string_lossy());

        self.runner.execute(ctx, &command).await?;
        Ok(ctx.cwd().join(&request.dest))
    }

    async fn checkout(
        &self,
        ctx: &ExecutionContext,
        repo_dir: &Path,
        git_ref: &str,
    ) -> Result<()> {
        if git_ref.is_empty() {
            return Err(CoreError::Git("cannot check out an empty ref".to_string()));
        }
        let command = CommandLine::new(["git", "-C"])
            .arg(repo_dir.to_string_lossy())
            .arg("checkout")
            .arg(git_ref);
        self.runner.execute(ctx, &command).await?;
        Ok(())
    }
}

/// Extract tag names from `git ls-remote --tags --refs` output.
///
/// Each line is `<sha>\trefs/tags/<name>`; blank or malformed lines are
/// ignored and remote order is kept.
pub fn parse_ls_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
        .map(|reference| {
            reference
                .strip_prefix("refs/tags/")
                .unwrap_or(reference)
                .to_string()
        })
        .collect()
}
