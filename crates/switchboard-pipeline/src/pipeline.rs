//! Pipeline orchestration over one source and many targets.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use conda_env_manager::{is_conda_available, EnvironmentProvisioner};
use switchboard_core::obs::{
    emit_run_finished, emit_run_started, emit_stage_skipped, emit_stage_started,
    emit_target_finished, emit_target_started, run_span, target_span,
};
use switchboard_core::{CommandRunner, ExecutionContext, VersionControl, VersionOracle};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::plan::RunPlan;
use crate::report::{Outcome, RunResult, TargetReport};
use crate::source::Source;
use crate::stage::{Stage, StageGate};
use crate::target::{Target, TargetState};

/// External collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub vcs: Arc<dyn VersionControl>,
    pub oracle: VersionOracle,
    pub environments: EnvironmentProvisioner,
}

impl Collaborators {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        vcs: Arc<dyn VersionControl>,
        environments: EnvironmentProvisioner,
    ) -> Self {
        let oracle = VersionOracle::new(vcs.clone());
        Self {
            runner,
            vcs,
            oracle,
            environments,
        }
    }
}

/// Run options that are not stages.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Print each environment's package set and the source diagnostics
    /// before testing.
    pub report_environment: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            report_environment: true,
        }
    }
}

/// Drives the pipeline.
///
/// The orchestrator owns the execution context: the working directory and
/// the search path (and with it the active environment) change only here,
/// between stages. Targets run strictly one after another.
pub struct Orchestrator {
    tools: Collaborators,
    ctx: ExecutionContext,
    base_dir: PathBuf,
    options: RunOptions,
}

impl Orchestrator {
    /// `ctx`'s working directory becomes the run's base directory.
    pub fn new(tools: Collaborators, ctx: ExecutionContext) -> Self {
        let base_dir = ctx.cwd().to_path_buf();
        Self {
            tools,
            ctx,
            base_dir,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Context as left by the last stage that ran.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Run every enabled stage for each target, in the order given.
    ///
    /// A target's environment is activated only when the environment,
    /// install or test stage is enabled, so fetch-only runs never need one.
    ///
    /// A target whose test commands exit non-zero is recorded as failed and
    /// the run moves on. Any other error aborts the run and no result is
    /// produced.
    pub async fn run(
        &mut self,
        source: &dyn Source,
        targets: &[Arc<dyn Target>],
        gate: &StageGate,
    ) -> Result<RunResult> {
        let names = unique_target_names(targets)?;
        let plan = RunPlan::new(self.base_dir.clone(), gate.clone(), names);
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id);

        self.run_plan(source, targets, &plan, run_id)
            .instrument(span)
            .await
    }

    async fn run_plan(
        &mut self,
        source: &dyn Source,
        targets: &[Arc<dyn Target>],
        plan: &RunPlan,
        run_id: String,
    ) -> Result<RunResult> {
        let started_at = Utc::now();
        let gate = &plan.gate;
        let stages: Vec<&str> = gate.enabled().iter().map(|s| s.name()).collect();
        emit_run_started(&run_id, plan.short_digest(), &stages, &plan.targets);

        self.prepare_toolchain(gate).await?;

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let span = target_span(target.name());
            let report = self
                .run_target(source, target.as_ref(), gate)
                .instrument(span)
                .await?;
            reports.push(report);
        }

        let result = RunResult {
            run_id,
            plan_digest: plan.digest.clone(),
            started_at,
            finished_at: Utc::now(),
            tests_selected: gate.tests_selected(),
            targets: reports,
        };
        emit_run_finished(
            &result.run_id,
            result.duration_ms(),
            &result.failed_targets(),
            result.success(),
        );
        Ok(result)
    }

    /// Bootstrap the toolchain, or only put an existing one on the path.
    async fn prepare_toolchain(&mut self, gate: &StageGate) -> Result<()> {
        let environments = &self.tools.environments;
        if gate.is_enabled(Stage::Toolchain) {
            let outcome = environments.bootstrap_toolchain(&mut self.ctx).await?;
            info!(outcome = ?outcome, root = %environments.layout().root.display(), "toolchain ready");
        } else {
            environments.inject_toolchain_path(&mut self.ctx)?;
            if !is_conda_available(&self.ctx) {
                warn!(
                    root = %environments.layout().root.display(),
                    "toolchain stage skipped and conda is not on the search path"
                );
            }
        }
        Ok(())
    }

    async fn run_target(
        &mut self,
        source: &dyn Source,
        target: &dyn Target,
        gate: &StageGate,
    ) -> Result<TargetReport> {
        let name = target.name().to_string();
        let start = Instant::now();
        let mut state = TargetState::Uncloned;
        emit_target_started(&name);

        self.ctx.set_cwd(self.base_dir.clone());

        if gate.is_enabled(Stage::Fetch) {
            emit_stage_started(&name, Stage::Fetch.name());
            target.fetch(&self.tools, &self.ctx).await?;
            state = TargetState::Fetched;
        } else {
            emit_stage_skipped(&name, Stage::Fetch.name());
        }
        self.ctx.set_cwd(target.spec().working_dir(&self.base_dir));

        if gate.is_enabled(Stage::Environment) {
            emit_stage_started(&name, Stage::Environment.name());
            self.prepare_environment(source, target).await?;
            state = TargetState::SourceInstalled;
        } else {
            emit_stage_skipped(&name, Stage::Environment.name());
        }

        let activated = gate.is_enabled(Stage::Environment)
            || gate.is_enabled(Stage::Install)
            || gate.is_enabled(Stage::Test);
        if activated {
            self.tools.environments.activate(&mut self.ctx, &name).await?;
        }

        if gate.is_enabled(Stage::Install) {
            emit_stage_started(&name, Stage::Install.name());
            target.install(&self.tools, &self.ctx).await?;
            state = TargetState::TargetInstalled;
        } else {
            emit_stage_skipped(&name, Stage::Install.name());
        }

        if activated && self.options.report_environment {
            self.report_environment(source, &name).await?;
        }

        let mut outcome = None;
        if gate.is_enabled(Stage::Test) {
            emit_stage_started(&name, Stage::Test.name());
            let tested = match target.run_tests(&self.tools, &mut self.ctx).await {
                Ok(()) => Outcome::Passed,
                Err(err) if err.is_command_failure() => {
                    warn!(target = %name, error = %err, "tests failed");
                    Outcome::Failed
                }
                Err(err) => return Err(err),
            };
            outcome = Some(tested);
            state = TargetState::Tested(tested);
        } else {
            emit_stage_skipped(&name, Stage::Test.name());
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        emit_target_finished(&name, outcome.map(|o| o.as_str()), duration_ms);
        Ok(TargetReport {
            name,
            outcome,
            state,
            duration_ms,
        })
    }

    /// Create the target's environment with the source and dependencies
    /// installed, unless an environment of that name already exists.
    async fn prepare_environment(&self, source: &dyn Source, target: &dyn Target) -> Result<()> {
        let environments = &self.tools.environments;
        let name = target.name();

        if environments.environment_exists(&self.ctx, name).await? {
            info!(environment = %name, "environment exists, reusing it as is");
            return Ok(());
        }

        environments.create_environment(&self.ctx, name).await?;
        source.install_into(&self.ctx, environments, name).await?;
        for spec in &target.spec().dependencies {
            environments.install(&self.ctx, name, spec).await?;
        }
        Ok(())
    }

    async fn report_environment(&self, source: &dyn Source, name: &str) -> Result<()> {
        self.tools.environments.describe(&self.ctx, name).await?;
        if let Some(command) = source.diagnostics() {
            self.tools.runner.execute(&self.ctx, &command).await?;
        }
        Ok(())
    }
}

fn unique_target_names(targets: &[Arc<dyn Target>]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::with_capacity(targets.len());
    for target in targets {
        let name = target.name();
        if !seen.insert(name) {
            return Err(PipelineError::DuplicateTarget(name.to_string()));
        }
        names.push(name.to_string());
    }
    Ok(names)
}
