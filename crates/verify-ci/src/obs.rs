//! Structured observability hooks for run lifecycle events.
//!
//! Events are emitted at `info!` (or `warn!` for unhappy outcomes) with an
//! `event` field, so JSON log consumers can filter on `run.*` and `job.*`.

use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::report::{JobResult, JobStatus, RunReport};
use crate::trigger::EventDescriptor;

/// Span for one job's task, parented to the current (run) span.
pub fn job_span(run_id: &Uuid, job_name: &str) -> Span {
    tracing::info_span!("verify.job", run_id = %run_id, job = %job_name)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &Uuid, pipeline: &str, job_count: usize) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline, job_count = job_count);
}

/// Emit event: trigger did not match, nothing ran.
pub fn emit_run_skipped(pipeline: &str, trigger: &EventDescriptor) {
    info!(event = "run.skipped", pipeline = %pipeline, trigger = %trigger);
}

/// Emit event: a job reached a terminal state.
pub fn emit_job_finished(result: &JobResult) {
    match result.status() {
        JobStatus::Passed => info!(
            event = "job.finished",
            job = %result.job_name(),
            status = %result.status(),
            duration_ms = result.duration_ms(),
        ),
        JobStatus::Failed => warn!(
            event = "job.finished",
            job = %result.job_name(),
            status = %result.status(),
            exit_code = ?result.exit_code(),
            duration_ms = result.duration_ms(),
        ),
        JobStatus::Errored { reason } => warn!(
            event = "job.finished",
            job = %result.job_name(),
            status = "errored",
            reason = %reason,
            duration_ms = result.duration_ms(),
        ),
    }
}

/// Emit event: run cancellation requested.
pub fn emit_run_cancelled(run_id: &Uuid) {
    warn!(event = "run.cancelled", run_id = %run_id);
}

/// Emit event: run finished with aggregate status.
pub fn emit_run_finished(report: &RunReport) {
    info!(
        event = "run.finished",
        run_id = %report.run_id(),
        overall = %report.overall_status(),
        passed = report.passed_count(),
        failed = report.failed_count(),
        errored = report.errored_count(),
        duration_ms = report.duration_ms(),
    );
}
