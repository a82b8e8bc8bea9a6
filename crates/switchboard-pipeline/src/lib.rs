//! Switchboard Pipeline - cross-project integration testing
//!
//! Provides an orchestrator that:
//! - Bootstraps a toolchain and one environment per target project
//! - Installs the package under test (the [`Source`]) into every environment
//! - Fetches, installs and tests each [`Target`] against it
//! - Isolates test failures per target and aggregates a [`RunResult`]

pub mod error;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod source;
pub mod stage;
pub mod target;

// Re-export key types
pub use error::{PipelineError, Result};
pub use pipeline::{Collaborators, Orchestrator, RunOptions};
pub use plan::RunPlan;
pub use report::{Outcome, RunResult, TargetReport, FAILED_TARGETS_EXIT_CODE};
pub use source::{PackageSource, Source, SourceSpec};
pub use stage::{Stage, StageGate};
pub use target::{
    fetch_working_copy, run_commands, ClonePolicy, StandardTarget, Target, TargetCommand,
    TargetSpec, TargetState,
};
