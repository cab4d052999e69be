//! Per-job results, the run report and its renderings.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::PipelineDefinition;
use crate::gate::{CiGate, GateVerdict};
use crate::job::{FailPolicy, JobSpec};
use crate::error::ExecutionError;
use crate::runner::CommandOutput;
use crate::trigger::EventDescriptor;

/// Why a job errored instead of producing a pass/fail verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorReason {
    /// The toolchain could not be provisioned; the command never ran.
    Provisioning { message: String },
    /// The command could not be started.
    Launch { message: String },
    /// The job exceeded its timeout.
    Timeout { after_ms: u64 },
    /// The run was cancelled before the job finished.
    Cancelled,
    /// The job's task died unexpectedly.
    Internal { message: String },
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Provisioning { message } => write!(f, "provisioning: {message}"),
            ErrorReason::Launch { message } => write!(f, "launch: {message}"),
            ErrorReason::Timeout { after_ms } if after_ms % 1000 == 0 => {
                write!(f, "timeout after {}s", after_ms / 1000)
            }
            ErrorReason::Timeout { after_ms } => write!(f, "timeout after {after_ms}ms"),
            ErrorReason::Cancelled => f.write_str("cancelled"),
            ErrorReason::Internal { message } => write!(f, "internal: {message}"),
        }
    }
}

/// Terminal status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Passed,
    Failed,
    Errored { reason: ErrorReason },
}

impl JobStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, JobStatus::Passed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, JobStatus::Errored { .. })
    }

    pub fn error_reason(&self) -> Option<&ErrorReason> {
        match self {
            JobStatus::Errored { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Passed => f.write_str("passed"),
            JobStatus::Failed => f.write_str("failed"),
            JobStatus::Errored { reason } => write!(f, "errored ({reason})"),
        }
    }
}

/// Outcome of one job execution. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    job_name: String,
    status: JobStatus,
    exit_code: Option<i32>,
    duration_ms: u64,
    #[serde(with = "lossy_text")]
    log: Vec<u8>,
    fail_policy: FailPolicy,
    /// Concrete toolchain version, when provisioning got that far.
    toolchain: Option<String>,
}

impl JobResult {
    /// Result of a command that ran to completion.
    pub fn completed(
        job: &JobSpec,
        output: CommandOutput,
        elapsed: Duration,
        toolchain: Option<String>,
    ) -> Self {
        let status = if output.success() {
            JobStatus::Passed
        } else {
            JobStatus::Failed
        };
        Self {
            job_name: job.name().to_string(),
            status,
            exit_code: output.exit_code,
            duration_ms: elapsed.as_millis() as u64,
            log: output.log,
            fail_policy: job.fail_policy(),
            toolchain,
        }
    }

    /// Result of a job that never produced a verdict.
    pub fn errored(
        job: &JobSpec,
        reason: ErrorReason,
        elapsed: Duration,
        toolchain: Option<String>,
    ) -> Self {
        Self {
            job_name: job.name().to_string(),
            log: reason.to_string().into_bytes(),
            status: JobStatus::Errored { reason },
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            fail_policy: job.fail_policy(),
            toolchain,
        }
    }

    /// Result of a command that could not be started. Whatever the shell
    /// printed before giving up is kept after the reason line.
    pub fn launch_failed(
        job: &JobSpec,
        error: ExecutionError,
        elapsed: Duration,
        toolchain: Option<String>,
    ) -> Self {
        let message = error.to_string();
        let ExecutionError::Launch { exit_code, log, .. } = error;

        let mut result = Self::errored(job, ErrorReason::Launch { message }, elapsed, toolchain);
        result.exit_code = exit_code;
        if !log.is_empty() {
            result.log.push(b'\n');
            result.log.extend_from_slice(&log);
        }
        result
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn log(&self) -> &[u8] {
        &self.log
    }

    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    pub fn toolchain(&self) -> Option<&str> {
        self.toolchain.as_deref()
    }

    pub fn passed(&self) -> bool {
        self.status.is_passed()
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({}ms", self.job_name, self.status, self.duration_ms)?;
        if let Some(code) = self.exit_code {
            write!(f, ", exit {code}")?;
        }
        f.write_str(")")
    }
}

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Passed,
    Failed,
    /// The trigger did not match the pipeline; nothing ran.
    NotTriggered,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverallStatus::Passed => "passed",
            OverallStatus::Failed => "failed",
            OverallStatus::NotTriggered => "not_triggered",
        })
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    run_id: Uuid,
    pipeline_name: String,
    pipeline_digest: String,
    trigger: EventDescriptor,
    /// In pipeline declaration order.
    results: Vec<JobResult>,
    overall_status: OverallStatus,
    cancelled: bool,
    started_at: DateTime<Utc>,
    duration_ms: u64,
}

impl RunReport {
    pub(crate) fn from_results(
        run_id: Uuid,
        pipeline: &PipelineDefinition,
        trigger: EventDescriptor,
        results: Vec<JobResult>,
        cancelled: bool,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let overall_status = if CiGate::evaluate(&results).passed {
            OverallStatus::Passed
        } else {
            OverallStatus::Failed
        };
        Self {
            run_id,
            pipeline_name: pipeline.name().to_string(),
            pipeline_digest: pipeline.digest(),
            trigger,
            results,
            overall_status,
            cancelled,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub(crate) fn not_triggered(
        run_id: Uuid,
        pipeline: &PipelineDefinition,
        trigger: EventDescriptor,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline.name().to_string(),
            pipeline_digest: pipeline.digest(),
            trigger,
            results: Vec::new(),
            overall_status: OverallStatus::NotTriggered,
            cancelled: false,
            started_at,
            duration_ms: 0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn pipeline_digest(&self) -> &str {
        &self.pipeline_digest
    }

    pub fn trigger(&self) -> &EventDescriptor {
        &self.trigger
    }

    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    /// Whether the run was cancelled before every job finished.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn result(&self, job_name: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.job_name == job_name)
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Passed
    }

    /// Number of jobs that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    /// Number of jobs that ran and failed.
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
            .count()
    }

    /// Number of jobs that never produced a verdict.
    pub fn errored_count(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_errored()).count()
    }

    /// Gate verdict with violation and warning details.
    pub fn verdict(&self) -> GateVerdict {
        CiGate::evaluate(&self.results)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.pipeline_name, self.trigger, self.overall_status
        )?;
        if self.overall_status != OverallStatus::NotTriggered {
            write!(
                f,
                " ({}/{} passed",
                self.passed_count(),
                self.results.len()
            )?;
            if self.cancelled {
                f.write_str(", cancelled")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Render a markdown summary for PR comments and check output.
pub fn render_summary_md(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Verification: {}\n\n", report.pipeline_name));
    out.push_str(&format!("- run: `{}`\n", report.run_id));
    out.push_str(&format!("- trigger: {}\n", report.trigger));
    out.push_str(&format!(
        "- pipeline digest: `{}`\n",
        &report.pipeline_digest[..12.min(report.pipeline_digest.len())]
    ));
    out.push_str(&format!("- overall: **{}**\n", report.overall_status));
    if report.cancelled {
        out.push_str("- cancelled: yes\n");
    }
    out.push('\n');

    if report.overall_status == OverallStatus::NotTriggered {
        out.push_str("Trigger did not match the pipeline; no jobs ran.\n");
        return out;
    }

    out.push_str("| job | policy | toolchain | status | exit code | duration |\n");
    out.push_str("|-----|--------|-----------|--------|-----------|----------|\n");
    for result in &report.results {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {}ms |\n",
            result.job_name,
            result.fail_policy.name(),
            result.toolchain.as_deref().unwrap_or("-"),
            result.status,
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.duration_ms,
        ));
    }

    let verdict = report.verdict();
    if !verdict.violations.is_empty() {
        out.push_str("\n## Violations\n");
        for v in &verdict.violations {
            out.push_str(&format!("- {}\n", v));
        }
    }
    if !verdict.warnings.is_empty() {
        out.push_str("\n## Warnings\n");
        for w in &verdict.warnings {
            out.push_str(&format!("- {}\n", w));
        }
    }
    out
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write the markdown summary.
pub fn write_summary_md(path: &Path, report: &RunReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Job logs are bytes; reports carry them as (lossy) UTF-8 text.
mod lossy_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}
