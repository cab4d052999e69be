//! Verify CI - build verification for Rust projects
//!
//! Provides a pipeline orchestrator that:
//! - Runs every job of a pipeline concurrently, each in its own toolchain
//! - Classifies each job as passed, failed or errored
//! - Aggregates results into a run report gated on hard-fail jobs
//! - Cancels and times out jobs without leaking provisioned environments

pub mod config;
pub mod definition;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod job;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use config::{load_pipeline, PipelineConfig};
pub use definition::PipelineDefinition;
pub use error::{DefinitionError, ExecutionError};
pub use gate::{CiGate, GateVerdict};
pub use job::{BuiltinJob, FailPolicy, JobSpec, DEFAULT_MSRV};
pub use pipeline::{cancellation, CancelHandle, CancelSignal, Orchestrator, DEFAULT_JOB_TIMEOUT};
pub use report::{
    render_summary_md, write_report_json, write_summary_md, ErrorReason, JobResult, JobStatus,
    OverallStatus, RunReport,
};
pub use runner::{CommandExecutor, CommandOutput, ShellExecutor};
pub use trigger::{EventDescriptor, EventKind, TriggerConditions};
