//! Projects tested against the source.
//!
//! A [`Target`] is a capability interface: every stage has a default
//! implementation driven by the target's [`TargetSpec`], and a target with
//! non-standard needs overrides only the stage that differs. The helpers
//! [`fetch_working_copy`] and [`run_commands`] are public so overrides can
//! fall back to the standard behavior for part of a stage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_core::{CloneRequest, CommandLine, CommandRunner, ExecutionContext, RefPolicy};
use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::Collaborators;
use crate::report::Outcome;

/// Where and at which ref a target is cloned from.
#[derive(Debug, Clone)]
pub struct ClonePolicy {
    pub url: String,
    pub git_ref: RefPolicy,
    /// Also fetch submodules.
    pub recursive: bool,
}

/// A command run from the target's working directory, or from a
/// subdirectory of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    pub command: CommandLine,
    pub subdir: Option<PathBuf>,
}

impl TargetCommand {
    pub fn new(line: &str) -> Self {
        Self {
            command: CommandLine::parse(line),
            subdir: None,
        }
    }

    pub fn in_subdir(subdir: impl Into<PathBuf>, line: &str) -> Self {
        Self {
            command: CommandLine::parse(line),
            subdir: Some(subdir.into()),
        }
    }
}

/// Declarative description of a target.
///
/// `name` doubles as the environment name and, for cloned targets, as the
/// working directory name under the run's base directory.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: String,
    /// Absent for targets installed from a package registry.
    pub clone: Option<ClonePolicy>,
    /// Dependency specifiers, applied one install at a time in this order.
    pub dependencies: Vec<String>,
    pub install: Vec<TargetCommand>,
    pub test: Vec<TargetCommand>,
    /// Variables set only while the test commands run.
    pub test_env: Vec<(String, String)>,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone: None,
            dependencies: Vec::new(),
            install: Vec::new(),
            test: Vec::new(),
            test_env: Vec::new(),
        }
    }

    pub fn cloned_from(mut self, url: impl Into<String>, git_ref: RefPolicy) -> Self {
        self.clone = Some(ClonePolicy {
            url: url.into(),
            git_ref,
            recursive: false,
        });
        self
    }

    /// Clone with submodules. No effect without a clone policy.
    pub fn recursive(mut self) -> Self {
        if let Some(clone) = self.clone.as_mut() {
            clone.recursive = true;
        }
        self
    }

    pub fn dependency(mut self, spec: impl Into<String>) -> Self {
        self.dependencies.push(spec.into());
        self
    }

    pub fn install_command(mut self, line: &str) -> Self {
        self.install.push(TargetCommand::new(line));
        self
    }

    pub fn install_command_in(mut self, subdir: impl Into<PathBuf>, line: &str) -> Self {
        self.install.push(TargetCommand::in_subdir(subdir, line));
        self
    }

    pub fn test_command(mut self, line: &str) -> Self {
        self.test.push(TargetCommand::new(line));
        self
    }

    pub fn test_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.test_env.push((key.into(), value.into()));
        self
    }

    /// Directory the install and test steps run from.
    pub fn working_dir(&self, base_dir: &Path) -> PathBuf {
        match self.clone {
            Some(_) => base_dir.join(&self.name),
            None => base_dir.to_path_buf(),
        }
    }
}

/// How far a target got in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Uncloned,
    Fetched,
    EnvironmentReady,
    SourceInstalled,
    TargetInstalled,
    Tested(Outcome),
}

/// A project whose test suite validates the source.
#[async_trait]
pub trait Target: Send + Sync {
    fn spec(&self) -> &TargetSpec;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Make the working copy available. `ctx` is positioned at the run's
    /// base directory.
    async fn fetch(&self, tools: &Collaborators, ctx: &ExecutionContext) -> Result<()> {
        fetch_working_copy(self.spec(), tools, ctx).await
    }

    /// Install the target into the activated environment.
    async fn install(&self, tools: &Collaborators, ctx: &ExecutionContext) -> Result<()> {
        run_commands(tools.runner.as_ref(), ctx, &self.spec().install).await
    }

    /// Run the test suite with the target's test variables set. The
    /// variables are restored on every exit path.
    async fn run_tests(&self, tools: &Collaborators, ctx: &mut ExecutionContext) -> Result<()> {
        let spec = self.spec();
        let scoped = ctx.scoped_env(
            spec.test_env
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
        run_commands(tools.runner.as_ref(), &scoped, &spec.test).await
    }
}

/// Clone the target into `<cwd>/<name>` at its resolved ref, unless a
/// working copy is already there or the target has no clone policy.
pub async fn fetch_working_copy(
    spec: &TargetSpec,
    tools: &Collaborators,
    ctx: &ExecutionContext,
) -> Result<()> {
    let Some(clone) = &spec.clone else {
        debug!(target = %spec.name, "no clone policy, nothing to fetch");
        return Ok(());
    };

    let dest = spec.working_dir(ctx.cwd());
    if dest.exists() {
        info!(target = %spec.name, dir = %dest.display(), "working copy present, skipping clone");
        return Ok(());
    }

    let git_ref = tools.oracle.resolve(ctx, &clone.url, &clone.git_ref).await?;
    let request = CloneRequest {
        url: clone.url.clone(),
        git_ref: Some(git_ref),
        dest: PathBuf::from(&spec.name),
        recursive: clone.recursive,
    };
    tools.vcs.clone_repo(ctx, &request).await?;
    Ok(())
}

/// Run `commands` in order, stopping at the first failure.
pub async fn run_commands(
    runner: &dyn CommandRunner,
    ctx: &ExecutionContext,
    commands: &[TargetCommand],
) -> Result<()> {
    for command in commands {
        match &command.subdir {
            Some(subdir) => {
                let mut sub = ctx.clone();
                sub.set_cwd(ctx.cwd().join(subdir));
                runner.execute(&sub, &command.command).await?;
            }
            None => runner.execute(ctx, &command.command).await?,
        }
    }
    Ok(())
}

/// [`Target`] using the default behavior for every stage.
#[derive(Debug, Clone)]
pub struct StandardTarget {
    spec: TargetSpec,
}

impl StandardTarget {
    pub fn new(spec: TargetSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Target for StandardTarget {
    fn spec(&self) -> &TargetSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conda_env_manager::fakes::{MemoryEnvironmentManager, MemoryInstaller};
    use conda_env_manager::{EnvironmentProvisioner, ToolchainLayout};
    use std::sync::Arc;
    use switchboard_core::fakes::ScriptedRunner;
    use switchboard_core::{GitClient, TagFilter, TagOrder};
    use tempfile::tempdir;

    fn tools(runner: Arc<ScriptedRunner>) -> Collaborators {
        let environments = EnvironmentProvisioner::new(
            ToolchainLayout::new("/work/miniconda3"),
            Arc::new(MemoryInstaller::preinstalled()),
            Arc::new(MemoryEnvironmentManager::new("/work/miniconda3/envs")),
        );
        Collaborators::new(runner.clone(), Arc::new(GitClient::new(runner)), environments)
    }

    fn umap() -> TargetSpec {
        TargetSpec::new("umap")
            .cloned_from(
                "https://github.com/lmcinnes/umap",
                RefPolicy::latest(TagFilter::any().exclude_prefix("v"), TagOrder::Raw),
            )
            .install_command("pip install -e .")
            .test_command("nosetests -s umap")
    }

    #[test]
    fn test_working_dir_depends_on_clone_policy() {
        let base = Path::new("/work");
        assert_eq!(umap().working_dir(base), PathBuf::from("/work/umap"));
        assert_eq!(TargetSpec::new("hpat").working_dir(base), PathBuf::from("/work"));
    }

    #[test]
    fn test_recursive_requires_clone_policy() {
        assert!(TargetSpec::new("hpat").recursive().clone.is_none());
        assert!(umap().recursive().clone.unwrap().recursive);
    }

    #[tokio::test]
    async fn test_fetch_resolves_tag_and_clones_shallow() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().with_stdout(
            "git ls-remote",
            "a1\trefs/tags/v0.1\nb2\trefs/tags/0.2\nc3\trefs/tags/0.3\n",
        ));
        let tools = tools(runner.clone());
        let ctx = ExecutionContext::from_process(dir.path());

        StandardTarget::new(umap()).fetch(&tools, &ctx).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1],
            "git clone -b 0.3 --depth=1 https://github.com/lmcinnes/umap umap"
        );
    }

    #[tokio::test]
    async fn test_fetch_skips_existing_working_copy() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("umap")).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let tools = tools(runner.clone());
        let ctx = ExecutionContext::from_process(dir.path());

        StandardTarget::new(umap()).fetch(&tools, &ctx).await.unwrap();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_clone_policy_is_noop() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = tools(runner.clone());
        let ctx = ExecutionContext::from_process("/work");

        StandardTarget::new(TargetSpec::new("hpat"))
            .fetch(&tools, &ctx)
            .await
            .unwrap();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_ref_skips_remote_listing() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let tools = tools(runner.clone());
        let ctx = ExecutionContext::from_process(dir.path());
        let spec = TargetSpec::new("clifford")
            .cloned_from("https://github.com/pygae/clifford.git", RefPolicy::Fixed("v1.0".into()));

        StandardTarget::new(spec).fetch(&tools, &ctx).await.unwrap();
        assert!(!runner.ran("git ls-remote"));
        assert!(runner.ran("git clone -b v1.0"));
    }

    #[tokio::test]
    async fn test_install_runs_subdir_commands_from_subdir() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = tools(runner.clone());
        let ctx = ExecutionContext::from_process("/work/awkward-array");
        let spec = TargetSpec::new("awkward-array")
            .install_command("python setup.py install")
            .install_command_in("awkward-numba", "python setup.py install");

        StandardTarget::new(spec).install(&tools, &ctx).await.unwrap();

        let recorded = runner.recorded();
        assert_eq!(recorded[0].cwd, PathBuf::from("/work/awkward-array"));
        assert_eq!(recorded[1].cwd, PathBuf::from("/work/awkward-array/awkward-numba"));
    }

    #[tokio::test]
    async fn test_run_tests_restores_variables_after_failure() {
        let runner = Arc::new(ScriptedRunner::new().with_exit_code("pytest", 1));
        let tools = tools(runner.clone());
        let mut ctx = ExecutionContext::isolated("/work", Default::default());
        ctx.set_var("NUMBA_DISABLE_JIT", "0");
        let spec = TargetSpec::new("librosa")
            .test_command("pytest")
            .test_env("NUMBA_DISABLE_JIT", "1")
            .test_env("LIBROSA_CACHE_DIR", "/tmp/cache");

        let err = StandardTarget::new(spec)
            .run_tests(&tools, &mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_command_failure());

        let seen = &runner.recorded()[0].env;
        assert_eq!(seen.get("NUMBA_DISABLE_JIT").map(String::as_str), Some("1"));
        assert_eq!(seen.get("LIBROSA_CACHE_DIR").map(String::as_str), Some("/tmp/cache"));

        assert_eq!(ctx.var("NUMBA_DISABLE_JIT"), Some("0"));
        assert_eq!(ctx.var("LIBROSA_CACHE_DIR"), None);
    }
}
