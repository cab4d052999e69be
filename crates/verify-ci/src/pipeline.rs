//! Pipeline orchestration: one concurrent task per job, joined in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use toolchain_provisioner::{ProvisioningError, ProvisioningSession, ToolchainProvisioner};
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::definition::PipelineDefinition;
use crate::error::ExecutionError;
use crate::job::JobSpec;
use crate::obs;
use crate::report::{ErrorReason, JobResult, RunReport};
use crate::runner::{CommandExecutor, CommandOutput};
use crate::trigger::EventDescriptor;

/// Timeout for jobs that do not set their own.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(3600);

/// Requests cancellation of a run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every job that has not finished yet. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation; cloned into every job task.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                if *self.rx.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Runs pipelines against one checkout.
///
/// The orchestrator only knows its collaborators through
/// [`ToolchainProvisioner`] and [`CommandExecutor`], so it can be driven by
/// fakes in tests.
pub struct Orchestrator {
    provisioner: ToolchainProvisioner,
    executor: Arc<dyn CommandExecutor>,
    checkout: PathBuf,
    default_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        provisioner: ToolchainProvisioner,
        executor: Arc<dyn CommandExecutor>,
        checkout: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provisioner,
            executor,
            checkout: checkout.into(),
            default_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Timeout applied to jobs without their own `timeout_secs`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn provisioner(&self) -> &ToolchainProvisioner {
        &self.provisioner
    }

    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    /// Run a pipeline to completion.
    pub async fn run(&self, pipeline: &PipelineDefinition, trigger: EventDescriptor) -> RunReport {
        self.run_with_cancel(pipeline, trigger, CancelSignal::never())
            .await
    }

    /// Run a pipeline, stopping unfinished jobs when `cancel` fires.
    ///
    /// Every job runs to a terminal state regardless of its siblings; there
    /// is no fail-fast. Results come back in declaration order.
    #[instrument(skip_all, fields(pipeline = %pipeline.name(), trigger = %trigger))]
    pub async fn run_with_cancel(
        &self,
        pipeline: &PipelineDefinition,
        trigger: EventDescriptor,
        cancel: CancelSignal,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        if !pipeline.trigger().matches(&trigger) {
            obs::emit_run_skipped(pipeline.name(), &trigger);
            return RunReport::not_triggered(run_id, pipeline, trigger, started_at);
        }

        let start = Instant::now();
        obs::emit_run_started(&run_id, pipeline.name(), pipeline.job_count());

        let session = Arc::new(self.provisioner.session());

        let tasks: Vec<_> = pipeline
            .jobs()
            .iter()
            .map(|job| {
                let job = job.clone();
                let session = Arc::clone(&session);
                let executor = Arc::clone(&self.executor);
                let checkout = self.checkout.clone();
                let timeout = job.effective_timeout(self.default_timeout);
                let mut cancel = cancel.clone();
                let span = obs::job_span(&run_id, job.name());

                tokio::spawn(
                    async move {
                        let start = Instant::now();
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                let result = JobResult::errored(&job, ErrorReason::Cancelled, start.elapsed(), None);
                                obs::emit_job_finished(&result);
                                result
                            }
                            result = execute_job(&job, &session, executor.as_ref(), &checkout, timeout) => result,
                        }
                    }
                    .instrument(span),
                )
            })
            .collect();

        let results: Vec<JobResult> = join_all(tasks)
            .await
            .into_iter()
            .zip(pipeline.jobs())
            .map(|(joined, job)| {
                joined.unwrap_or_else(|e| {
                    warn!(job = %job.name(), error = %e, "job task failed");
                    JobResult::errored(
                        job,
                        ErrorReason::Internal {
                            message: e.to_string(),
                        },
                        start.elapsed(),
                        None,
                    )
                })
            })
            .collect();

        let cancelled = any_cancelled(&results);
        if cancelled {
            obs::emit_run_cancelled(&run_id);
        }

        let report = RunReport::from_results(
            run_id,
            pipeline,
            trigger,
            results,
            cancelled,
            started_at,
            start.elapsed(),
        );
        obs::emit_run_finished(&report);
        report
    }
}

/// Provision, execute and classify a single job.
///
/// The timeout covers provisioning as well as the command. The environment
/// lives only inside this future: it is released when the job finishes, or
/// when the future is dropped on cancellation.
async fn execute_job(
    job: &JobSpec,
    session: &ProvisioningSession,
    executor: &dyn CommandExecutor,
    checkout: &Path,
    timeout: Duration,
) -> JobResult {
    let start = Instant::now();
    let mut toolchain = None;

    let outcome = tokio::time::timeout(
        timeout,
        provision_and_execute(job, session, executor, checkout, &mut toolchain),
    )
    .await;

    let result = match outcome {
        Ok(Ok(Ok(output))) => JobResult::completed(job, output, start.elapsed(), toolchain),
        Ok(Ok(Err(e))) => JobResult::launch_failed(job, e, start.elapsed(), toolchain),
        Ok(Err(e)) => JobResult::errored(
            job,
            ErrorReason::Provisioning {
                message: e.to_string(),
            },
            start.elapsed(),
            None,
        ),
        Err(_) => JobResult::errored(
            job,
            ErrorReason::Timeout {
                after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            start.elapsed(),
            toolchain,
        ),
    };

    obs::emit_job_finished(&result);
    result
}

/// `toolchain` is filled in as soon as the environment exists, so a timeout
/// during execution still reports which toolchain the job ran on.
async fn provision_and_execute(
    job: &JobSpec,
    session: &ProvisioningSession,
    executor: &dyn CommandExecutor,
    checkout: &Path,
    toolchain: &mut Option<String>,
) -> Result<Result<CommandOutput, ExecutionError>, ProvisioningError> {
    let env = session
        .provision(job.name(), job.toolchain(), job.components())
        .await?;
    *toolchain = Some(env.version().to_string());

    info!(toolchain = %env.version(), command = %job.command(), "executing job");
    Ok(executor.execute(job.command(), &env, checkout).await)
}

/// A run counts as cancelled only if cancellation actually stopped a job.
fn any_cancelled(results: &[JobResult]) -> bool {
    results
        .iter()
        .any(|r| r.status().error_reason() == Some(&ErrorReason::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolchain_provisioner::VersionSelector;

    #[tokio::test]
    async fn test_never_signal_does_not_fire() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_cancel_handle_fires_signal() {
        let (handle, mut signal) = cancellation();
        let mut other = signal.clone();
        assert!(!handle.is_cancelled());

        handle.cancel();
        handle.cancel();

        signal.cancelled().await;
        other.cancelled().await;
        assert!(signal.is_cancelled());
        assert!(handle.is_cancelled());
    }

    fn job(name: &str) -> JobSpec {
        JobSpec::new(name, VersionSelector::LatestStable, "true")
    }

    #[test]
    fn test_run_is_cancelled_only_when_a_job_was() {
        let passed = JobResult::completed(
            &job("fmt"),
            CommandOutput {
                exit_code: Some(0),
                log: Vec::new(),
            },
            Duration::from_millis(5),
            None,
        );
        let timed_out = JobResult::errored(
            &job("test"),
            ErrorReason::Timeout { after_ms: 200 },
            Duration::from_millis(200),
            None,
        );
        assert!(!any_cancelled(&[passed.clone(), timed_out]));

        let cancelled = JobResult::errored(
            &job("clippy"),
            ErrorReason::Cancelled,
            Duration::from_millis(1),
            None,
        );
        assert!(any_cancelled(&[passed, cancelled]));
        assert!(!any_cancelled(&[]));
    }

    #[tokio::test]
    async fn test_cancel_before_drop_is_observed() {
        let (handle, mut signal) = cancellation();
        handle.cancel();
        drop(handle);
        signal.cancelled().await;
    }
}
