//! Integration tests for the orchestrator with scripted commands and
//! in-memory environments.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conda_env_manager::fakes::{MemoryEnvironmentManager, MemoryInstaller};
use conda_env_manager::{EnvironmentProvisioner, ToolchainLayout};
use switchboard_core::fakes::ScriptedRunner;
use switchboard_core::{
    CommandLine, CoreError, ExecutionContext, GitClient, ProcessError, RefPolicy, TagFilter,
    TagOrder, PATH_VAR,
};
use switchboard_pipeline::{
    Collaborators, Orchestrator, Outcome, PackageSource, PipelineError, RunOptions, SourceSpec,
    Stage, StageGate, StandardTarget, Target, TargetSpec, TargetState, FAILED_TARGETS_EXIT_CODE,
};
use tempfile::TempDir;

const UMAP_TAGS: &str = "\
a1\trefs/tags/v0.1
b2\trefs/tags/0.2
c3\trefs/tags/0.3
";

struct Harness {
    dir: TempDir,
    runner: Arc<ScriptedRunner>,
    manager: Arc<MemoryEnvironmentManager>,
    installer: Arc<MemoryInstaller>,
}

impl Harness {
    fn new(runner: ScriptedRunner) -> Self {
        Self::with_manager(runner, |manager| manager)
    }

    fn with_manager(
        runner: ScriptedRunner,
        configure: impl FnOnce(MemoryEnvironmentManager) -> MemoryEnvironmentManager,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(runner);
        let manager = configure(
            MemoryEnvironmentManager::new(dir.path().join("miniconda3/envs"))
                .mirrored_to(runner.clone()),
        );
        Self {
            dir,
            runner,
            manager: Arc::new(manager),
            installer: Arc::new(MemoryInstaller::new()),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        let environments = EnvironmentProvisioner::new(
            ToolchainLayout::new(self.dir.path().join("miniconda3")),
            self.installer.clone(),
            self.manager.clone(),
        );
        let tools = Collaborators::new(
            self.runner.clone(),
            Arc::new(GitClient::new(self.runner.clone())),
            environments,
        );
        let mut env = BTreeMap::new();
        env.insert(PATH_VAR.to_string(), "/usr/bin".to_string());
        Orchestrator::new(tools, ExecutionContext::isolated(self.dir.path(), env))
    }

    fn position(&self, prefix: &str) -> usize {
        self.runner
            .commands()
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("'{prefix}' was never run: {:?}", self.runner.commands()))
    }
}

fn numba() -> PackageSource {
    PackageSource::new(
        "numba",
        SourceSpec::Channel {
            channels: vec!["numba/label/dev".to_string()],
            packages: vec!["numba".to_string()],
        },
    )
    .with_diagnostics(CommandLine::parse("numba -s"))
}

fn umap() -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new("umap")
            .cloned_from(
                "https://github.com/lmcinnes/umap",
                RefPolicy::latest(TagFilter::any().exclude_prefix("v"), TagOrder::Raw),
            )
            .dependency("numpy scikit-learn scipy nose")
            .install_command("pip install -e .")
            .test_command("nosetests -s umap"),
    ))
}

fn registry_target(name: &str) -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new(name)
            .dependency("numpy")
            .install_command(&format!("pip install {name}"))
            .test_command(&format!("pytest --pyargs {name}")),
    ))
}

/// Test: a fetch-only run on a fresh workspace clones without any environment
#[tokio::test]
async fn test_fetch_only_run_needs_no_environment() {
    let harness = Harness::new(ScriptedRunner::new().with_stdout("git ls-remote", UMAP_TAGS));
    let mut orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(&numba(), &[umap()], &StageGate::only(Stage::Fetch))
        .await
        .expect("fetch-only run failed");

    assert!(result.success());
    assert!(!result.tests_selected);
    assert_eq!(result.targets[0].state, TargetState::Fetched);
    assert_eq!(result.targets[0].outcome, None);
    assert_eq!(
        harness.runner.commands(),
        vec![
            "git ls-remote --tags --refs https://github.com/lmcinnes/umap".to_string(),
            "git clone -b 0.3 --depth=1 https://github.com/lmcinnes/umap umap".to_string(),
        ]
    );
    assert!(orchestrator.context().active_bin().is_none());
}

/// Test: full run installs the source before the target and passes
#[tokio::test]
async fn test_full_run_installs_source_before_target() {
    let harness = Harness::new(ScriptedRunner::new().with_stdout("git ls-remote", UMAP_TAGS));
    let mut orchestrator = harness.orchestrator();

    let result = orchestrator
        .run(&numba(), &[umap()], &StageGate::all())
        .await
        .expect("run failed");

    assert!(result.success());
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.targets[0].outcome, Some(Outcome::Passed));
    assert_eq!(result.targets[0].state, TargetState::Tested(Outcome::Passed));
    assert_eq!(harness.installer.install_count(), 1);

    let clone = harness.position("git clone -b 0.3 --depth=1");
    let create = harness.position("conda create -y -n umap");
    let source = harness.position("conda install -y -n umap -c numba/label/dev numba");
    let deps = harness.position("conda install -y -n umap numpy scikit-learn scipy nose");
    let install = harness.position("pip install -e .");
    let report = harness.position("numba -s");
    let test = harness.position("nosetests -s umap");
    assert!(harness.position("conda update -y -n base") < clone);
    assert!(clone < create && create < source && source < deps);
    assert!(deps < install && install < report && report < test);

    let recorded = harness.runner.recorded();
    assert_eq!(recorded[install].cwd, harness.dir.path().join("umap"));
    assert!(recorded[test].env[PATH_VAR].contains("envs/umap/bin"));
}

/// Test: environment-ready is a no-op once the environment exists
#[tokio::test]
async fn test_environment_stage_is_idempotent() {
    let harness = Harness::new(ScriptedRunner::new());
    let mut orchestrator = harness.orchestrator();
    let gate = StageGate::only(Stage::Environment);
    let targets = [registry_target("hpat")];

    orchestrator.run(&numba(), &targets, &gate).await.expect("first run");
    orchestrator.run(&numba(), &targets, &gate).await.expect("second run");

    assert_eq!(harness.runner.count("conda create -y -n hpat"), 1);
    assert_eq!(harness.runner.count("conda install -y -n hpat"), 2);
    assert_eq!(harness.manager.count("create"), 1);
}

/// Test: a failing test suite is recorded and the next target still runs
#[tokio::test]
async fn test_failure_isolated_to_one_target() {
    let harness = Harness::new(ScriptedRunner::new().with_exit_code("pytest --pyargs second", 1));
    let mut orchestrator = harness.orchestrator();
    let targets = [
        registry_target("first"),
        registry_target("second"),
        registry_target("third"),
    ];

    let result = orchestrator
        .run(&numba(), &targets, &StageGate::all())
        .await
        .expect("run failed");

    assert_eq!(result.failed_targets(), vec!["second"]);
    assert!(harness.runner.ran("pytest --pyargs third"));
    assert_eq!(result.targets[2].outcome, Some(Outcome::Passed));
    assert!(!result.success());
    assert_eq!(result.exit_code(), FAILED_TARGETS_EXIT_CODE);
    assert_eq!(
        result.summary_message().as_deref(),
        Some("The following tests failed: second")
    );
}

/// Test: test variables are unset again after a failing test step
#[tokio::test]
async fn test_test_variables_restored_after_failure() {
    let harness = Harness::new(ScriptedRunner::new().with_exit_code("pytest", 1));
    let mut orchestrator = harness.orchestrator();
    let target: Arc<dyn Target> = Arc::new(StandardTarget::new(
        TargetSpec::new("librosa")
            .test_command("pytest")
            .test_env("NUMBA_DISABLE_JIT", "1")
            .test_env("LIBROSA_TEST_MODE", "ci"),
    ));

    let result = orchestrator
        .run(&numba(), &[target], &StageGate::all())
        .await
        .expect("run failed");

    assert_eq!(result.failed_targets(), vec!["librosa"]);
    let test = &harness.runner.recorded()[harness.position("pytest")];
    assert_eq!(test.env.get("NUMBA_DISABLE_JIT").map(String::as_str), Some("1"));
    assert_eq!(test.env.get("LIBROSA_TEST_MODE").map(String::as_str), Some("ci"));

    assert_eq!(orchestrator.context().var("NUMBA_DISABLE_JIT"), None);
    assert_eq!(orchestrator.context().var("LIBROSA_TEST_MODE"), None);
}

/// Test: only the test stage on a prepared workspace runs only the tests
#[tokio::test]
async fn test_only_test_stage_runs_only_test_command() {
    let harness = Harness::with_manager(ScriptedRunner::new(), |m| m.with_environment("umap"));
    std::fs::create_dir(harness.dir.path().join("umap")).expect("working copy");
    let mut orchestrator = harness.orchestrator().with_options(RunOptions {
        report_environment: false,
    });

    let result = orchestrator
        .run(&numba(), &[umap()], &StageGate::only(Stage::Test))
        .await
        .expect("run failed");

    assert_eq!(harness.runner.commands(), vec!["nosetests -s umap"]);
    assert_eq!(harness.runner.recorded()[0].cwd, harness.dir.path().join("umap"));
    assert_eq!(harness.installer.install_count(), 0);
    assert!(result.success());
}

/// Test: a source install failure aborts before any target install
#[tokio::test]
async fn test_source_install_failure_is_fatal() {
    let harness = Harness::with_manager(ScriptedRunner::new(), |m| m.with_failing_install("numba"));
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .run(
            &numba(),
            &[registry_target("first"), registry_target("second")],
            &StageGate::all(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceInstall { .. }));
    assert!(!harness.runner.ran("pip install"));
    assert!(!harness.runner.ran("pytest"));
    assert_eq!(harness.manager.count("create second"), 0);
}

/// Test: an install command failure aborts the run
#[tokio::test]
async fn test_install_failure_is_fatal() {
    let harness = Harness::new(ScriptedRunner::new().with_exit_code("pip install first", 1));
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .run(
            &numba(),
            &[registry_target("first"), registry_target("second")],
            &StageGate::all(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Process(ProcessError::NonZeroExit { .. })));
    assert!(!harness.runner.ran("pytest"));
    assert!(!harness.runner.ran("pip install second"));
}

/// Test: a timed-out test command aborts instead of being recorded as failed
#[tokio::test]
async fn test_test_timeout_is_fatal() {
    let harness = Harness::new(ScriptedRunner::new().with_timeout("pytest --pyargs first"));
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .run(
            &numba(),
            &[registry_target("first"), registry_target("second")],
            &StageGate::all(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Process(ProcessError::Timeout { .. })));
    assert!(!harness.runner.ran("pytest --pyargs second"));
}

/// Test: no qualifying tag aborts the fetch
#[tokio::test]
async fn test_unresolvable_ref_aborts() {
    let harness = Harness::new(
        ScriptedRunner::new().with_stdout("git ls-remote", "a1\trefs/tags/v0.1\nb2\trefs/tags/v0.2\n"),
    );
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .run(&numba(), &[umap()], &StageGate::all())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Core(CoreError::NoMatchingTag { .. })));
    assert!(!harness.runner.ran("git clone"));
}

/// Test: duplicate target names are rejected before anything runs
#[tokio::test]
async fn test_duplicate_targets_rejected() {
    let harness = Harness::new(ScriptedRunner::new());
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .run(
            &numba(),
            &[registry_target("hpat"), registry_target("hpat")],
            &StageGate::all(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DuplicateTarget(_)));
    assert!(harness.runner.commands().is_empty());
    assert_eq!(harness.installer.install_count(), 0);
}

struct ChannelInstalledTarget {
    spec: TargetSpec,
}

#[async_trait]
impl Target for ChannelInstalledTarget {
    fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    async fn install(
        &self,
        tools: &Collaborators,
        ctx: &ExecutionContext,
    ) -> switchboard_pipeline::Result<()> {
        tools
            .environments
            .install(ctx, self.name(), "-c ehsantn -c anaconda -c conda-forge hpat")
            .await?;
        Ok(())
    }
}

/// Test: an overridden stage replaces the default behavior
#[tokio::test]
async fn test_install_override() {
    let harness = Harness::new(ScriptedRunner::new());
    let mut orchestrator = harness.orchestrator();
    let target: Arc<dyn Target> = Arc::new(ChannelInstalledTarget {
        spec: TargetSpec::new("hpat")
            .install_command("never run")
            .test_command("python -m hpat.runtests"),
    });

    let result = orchestrator
        .run(&numba(), &[target], &StageGate::all())
        .await
        .expect("run failed");

    assert!(result.success());
    assert!(harness
        .runner
        .ran("conda install -y -n hpat -c ehsantn -c anaconda -c conda-forge hpat"));
    assert!(!harness.runner.ran("never run"));
    assert!(harness.position("conda install -y -n hpat -c ehsantn") < harness.position("python -m hpat.runtests"));
}
