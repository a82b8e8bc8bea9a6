//! Run plan and identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::stage::StageGate;

/// What a run is about to do.
///
/// The digest is deterministic over the base directory, the enabled stages
/// and the ordered target names, so identical invocations share it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPlan {
    pub base_dir: PathBuf,
    pub gate: StageGate,
    pub targets: Vec<String>,
    pub digest: String,
}

impl RunPlan {
    pub fn new(base_dir: PathBuf, gate: StageGate, targets: Vec<String>) -> Self {
        let digest = compute_plan_digest(&base_dir, &gate, &targets);
        Self {
            base_dir,
            gate,
            targets,
            digest,
        }
    }

    /// First 12 hex characters of the digest.
    pub fn short_digest(&self) -> &str {
        &self.digest[..12]
    }
}

fn compute_plan_digest(base_dir: &std::path::Path, gate: &StageGate, targets: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_dir.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    for stage in gate.enabled() {
        hasher.update(stage.name().as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"\x1f");
    for target in targets {
        hasher.update(target.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
