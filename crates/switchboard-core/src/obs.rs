//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - Run- and target-scoped tracing spans
//! - Emission functions for lifecycle events: run start/finish, target
//!   start/finish, stage start/skip
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::{info, Span};

/// Span covering a whole run. Attach it with `tracing::Instrument` so it is
/// entered only while the run's future is polled.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("switchboard.run", run_id = %run_id)
}

/// Span covering the processing of one target.
pub fn target_span(target: &str) -> Span {
    tracing::info_span!("switchboard.target", target = %target)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, plan_digest: &str, stages: &[&str], targets: &[String]) {
    info!(
        event = "run.started",
        run_id = %run_id,
        plan = %plan_digest,
        stages = ?stages,
        targets = ?targets,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, failed: &[String], success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed = ?failed,
        success = success,
    );
}

pub fn emit_target_started(target: &str) {
    info!(event = "target.started", target = %target);
}

/// Emit event: target finished; `outcome` is absent when tests were not run.
pub fn emit_target_finished(target: &str, outcome: Option<&str>, duration_ms: u64) {
    info!(
        event = "target.finished",
        target = %target,
        outcome = outcome.unwrap_or("not_tested"),
        duration_ms = duration_ms,
    );
}

pub fn emit_stage_started(target: &str, stage: &str) {
    info!(event = "stage.started", target = %target, stage = %stage);
}

pub fn emit_stage_skipped(target: &str, stage: &str) {
    info!(event = "stage.skipped", target = %target, stage = %stage);
}
