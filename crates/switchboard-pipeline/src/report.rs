//! Per-target outcomes and the aggregate run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::TargetState;

/// Process exit status reserved for "one or more targets failed their tests".
pub const FAILED_TARGETS_EXIT_CODE: i32 = 23;

/// Result of a target's test stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
        }
    }
}

/// What happened to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub name: String,

    /// Absent when the test stage was not selected.
    pub outcome: Option<Outcome>,

    /// Last state reached.
    pub state: TargetState,

    pub duration_ms: u64,
}

impl TargetReport {
    pub fn failed(&self) -> bool {
        self.outcome == Some(Outcome::Failed)
    }
}

/// Aggregate result of a run, in target order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,

    /// Digest of the run plan.
    pub plan_digest: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Whether the test stage was part of this run.
    pub tests_selected: bool,

    pub targets: Vec<TargetReport>,
}

impl RunResult {
    /// Names of targets whose tests failed, in run order.
    pub fn failed_targets(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.failed())
            .map(|t| t.name.clone())
            .collect()
    }

    /// A run without the test stage always succeeds.
    pub fn success(&self) -> bool {
        !self.tests_selected || self.targets.iter().all(|t| !t.failed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            FAILED_TARGETS_EXIT_CODE
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Final user-facing line; `None` when tests were not run.
    pub fn summary_message(&self) -> Option<String> {
        if !self.tests_selected {
            return None;
        }
        let failed = self.failed_targets();
        if failed.is_empty() {
            Some("All integration tests successful".to_string())
        } else {
            Some(format!("The following tests failed: {}", failed.join(", ")))
        }
    }
}
