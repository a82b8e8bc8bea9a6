//! Switchboard - cross-project integration testing CLI
//!
//! The `switchboard` command installs a development build of the source
//! package into one environment per downstream project and runs each
//! project's test suite against it.
//!
//! ## Stages
//!
//! - `toolchain`: install Miniconda (once) and update conda
//! - `fetch`: clone each target at its newest qualifying tag
//! - `environment`: create the target's environment with the source installed
//! - `install`: install the target
//! - `test`: run the target's tests
//!
//! Exits 0 on success, 23 when any target's tests failed, and 1 on any
//! error that aborted the run.

mod registry;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use conda_env_manager::{CondaManager, EnvironmentProvisioner, MinicondaInstaller, ToolchainConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{CommandRunner, ExecutionContext, GitClient, SystemRunner};
use switchboard_pipeline::{Collaborators, Orchestrator, RunOptions, Stage, StageGate};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run downstream projects' test suites against a source package", long_about = None)]
struct Cli {
    /// Stages to run (default: all)
    #[arg(short = 's', long, value_enum, num_args = 1.., value_name = "STAGE")]
    stages: Vec<StageArg>,

    /// Targets to run (default: all, in registry order)
    #[arg(short = 't', long, num_args = 1.., value_name = "TARGET")]
    targets: Vec<String>,

    /// Base directory for the toolchain, checkouts and installer
    #[arg(long, env = "SWITCHBOARD_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Toolchain install directory, relative to the workdir
    /// (also read from SWITCHBOARD_TOOLCHAIN_DIR; default: miniconda3)
    #[arg(long)]
    toolchain_dir: Option<PathBuf>,

    /// Installer URL (also read from SWITCHBOARD_INSTALLER_URL; default:
    /// the published installer for this platform)
    #[arg(long)]
    installer_url: Option<String>,

    /// Per-command timeout in seconds, 0 for none
    #[arg(long, env = "SWITCHBOARD_COMMAND_TIMEOUT", default_value_t = 0)]
    command_timeout: u64,

    /// Skip printing each environment's packages and source diagnostics
    #[arg(long)]
    no_env_report: bool,

    /// Print the registered targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and print the run result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    #[value(alias = "miniconda")]
    Toolchain,
    #[value(alias = "clone")]
    Fetch,
    Environment,
    Install,
    #[value(alias = "tests")]
    Test,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Toolchain => Stage::Toolchain,
            StageArg::Fetch => Stage::Fetch,
            StageArg::Environment => Stage::Environment,
            StageArg::Install => Stage::Install,
            StageArg::Test => Stage::Test,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    switchboard_core::init_tracing(cli.json, level);

    if cli.list_targets {
        for name in registry::target_names() {
            println!("{name}");
        }
        return Ok(());
    }

    let code = cmd_run(&cli).await?;
    std::process::exit(code);
}

/// Run the pipeline and return the process exit code.
async fn cmd_run(cli: &Cli) -> Result<i32> {
    let targets = registry::select_targets(&cli.targets)?;
    let gate = stage_gate(&cli.stages);
    let workdir = resolve_workdir(cli.workdir.as_deref())?;
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create workdir {}", workdir.display()))?;

    let config = toolchain_config(cli, &workdir);
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let installer = MinicondaInstaller::new(config.clone(), runner.clone())
        .context("Failed to set up the toolchain installer")?;
    let environments = EnvironmentProvisioner::new(
        config.layout(),
        Arc::new(installer),
        Arc::new(CondaManager::new(runner.clone())),
    );
    let tools = Collaborators::new(
        runner.clone(),
        Arc::new(GitClient::new(runner)),
        environments,
    );

    let timeout = (cli.command_timeout > 0).then(|| Duration::from_secs(cli.command_timeout));
    let ctx = ExecutionContext::from_process(workdir.clone()).with_timeout(timeout);

    let stage_names: Vec<&str> = gate.enabled().iter().map(|s| s.name()).collect();
    let target_names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
    info!(stages = ?stage_names, targets = ?target_names, workdir = %workdir.display(), "starting run");

    let mut orchestrator = Orchestrator::new(tools, ctx).with_options(RunOptions {
        report_environment: !cli.no_env_report,
    });
    let result = orchestrator
        .run(&registry::numba_source(), &targets, &gate)
        .await
        .context("Integration run aborted")?;

    if let Some(message) = result.summary_message() {
        println!("{message}");
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(result.exit_code())
}

fn stage_gate(stages: &[StageArg]) -> StageGate {
    if stages.is_empty() {
        StageGate::all()
    } else {
        StageGate::from_stages(stages.iter().copied().map(Stage::from))
    }
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(match workdir {
        Some(dir) => cwd.join(dir),
        None => cwd,
    })
}

fn toolchain_config(cli: &Cli, workdir: &Path) -> ToolchainConfig {
    let mut config =
        ToolchainConfig::from_env(workdir).with_installer_url(cli.installer_url.clone());
    if let Some(dir) = &cli.toolchain_dir {
        config = config.with_root(workdir.join(dir));
    }
    config
}
