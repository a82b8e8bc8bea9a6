//! Pipeline stages and stage gating.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One phase of the pipeline, declared in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Install the base toolchain (once per run) and put it on the path.
    Toolchain,

    /// Clone each target at its resolved ref.
    Fetch,

    /// Create the target's environment, install the source and dependencies.
    Environment,

    /// Run the target's install commands.
    Install,

    /// Run the target's test commands.
    Test,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Toolchain,
        Stage::Fetch,
        Stage::Environment,
        Stage::Install,
        Stage::Test,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Toolchain => "toolchain",
            Stage::Fetch => "fetch",
            Stage::Environment => "environment",
            Stage::Install => "install",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toolchain" | "miniconda" => Ok(Stage::Toolchain),
            "fetch" | "clone" => Ok(Stage::Fetch),
            "environment" | "env" => Ok(Stage::Environment),
            "install" => Ok(Stage::Install),
            "test" | "tests" => Ok(Stage::Test),
            other => Err(PipelineError::Configuration(format!(
                "unknown stage '{other}'"
            ))),
        }
    }
}

/// Which stages are enabled for a run.
///
/// Stages run in pipeline order no matter how the set was built. A disabled
/// stage assumes its postcondition already holds, which is what makes
/// resuming a partial run possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageGate {
    enabled: BTreeSet<Stage>,
}

impl StageGate {
    /// All five stages.
    pub fn all() -> Self {
        Self::from_stages(Stage::ALL)
    }

    pub fn from_stages(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self {
            enabled: stages.into_iter().collect(),
        }
    }

    /// A single stage.
    pub fn only(stage: Stage) -> Self {
        Self::from_stages([stage])
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.enabled.contains(&stage)
    }

    /// Enabled stages in pipeline order.
    pub fn enabled(&self) -> Vec<Stage> {
        self.enabled.iter().copied().collect()
    }

    /// Whether the run's outcome depends on test results.
    pub fn tests_selected(&self) -> bool {
        self.is_enabled(Stage::Test)
    }
}

impl Default for StageGate {
    fn default() -> Self {
        Self::all()
    }
}
