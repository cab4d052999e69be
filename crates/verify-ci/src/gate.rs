//! CI gate evaluation for pass/fail criteria.

use serde::{Deserialize, Serialize};

use crate::job::FailPolicy;
use crate::report::{JobResult, JobStatus};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Hard-fail jobs that did not pass (empty if passed).
    pub violations: Vec<String>,

    /// Advisory jobs that did not pass; reported, never gating.
    pub warnings: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// CI gate evaluation rules.
pub struct CiGate;

impl CiGate {
    /// Evaluate job results.
    ///
    /// Gate rule: the gate fails iff at least one `hard_fail` job has a
    /// status other than `passed`. Failed and errored jobs count alike, so an
    /// infrastructure error blocks a merge just as a broken build does.
    pub fn evaluate(results: &[JobResult]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for result in results.iter().filter(|r| !r.passed()) {
            let finding = describe(result);
            match result.fail_policy() {
                FailPolicy::HardFail => violations.push(finding),
                FailPolicy::Advisory => warnings.push(finding),
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All hard-fail jobs passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            warnings,
            message,
        }
    }
}

fn describe(result: &JobResult) -> String {
    match (result.status(), result.exit_code()) {
        (JobStatus::Failed, Some(code)) => {
            format!("Job '{}' failed with exit code {}", result.job_name(), code)
        }
        (JobStatus::Failed, None) => {
            format!("Job '{}' was terminated by a signal", result.job_name())
        }
        (JobStatus::Errored { reason }, _) => {
            format!("Job '{}' errored: {}", result.job_name(), reason)
        }
        (JobStatus::Passed, _) => format!("Job '{}' passed", result.job_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use crate::report::ErrorReason;
    use crate::runner::CommandOutput;
    use std::time::Duration;
    use toolchain_provisioner::VersionSelector;

    fn exited(name: &str, code: i32, policy: FailPolicy) -> JobResult {
        let job = JobSpec::new(name, VersionSelector::LatestStable, "true").with_fail_policy(policy);
        JobResult::completed(
            &job,
            CommandOutput {
                exit_code: Some(code),
                log: Vec::new(),
            },
            Duration::from_millis(10),
            None,
        )
    }

    fn errored(name: &str, reason: ErrorReason) -> JobResult {
        let job = JobSpec::new(name, VersionSelector::LatestStable, "true");
        JobResult::errored(&job, reason, Duration::from_millis(10), None)
    }

    #[test]
    fn test_empty_results_pass() {
        let verdict = CiGate::evaluate(&[]);
        assert!(verdict.passed);
    }

    #[test]
    fn test_all_passed() {
        let results: Vec<JobResult> = ["msrv_build", "check_fmt", "test", "lint"]
            .iter()
            .map(|name| exited(name, 0, FailPolicy::HardFail))
            .collect();

        let verdict = CiGate::evaluate(&results);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.message, "All hard-fail jobs passed");
    }

    #[test]
    fn test_hard_fail_failure() {
        let results = vec![
            exited("fmt", 0, FailPolicy::HardFail),
            exited("test", 127, FailPolicy::HardFail),
        ];

        let verdict = CiGate::evaluate(&results);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("127"));
    }

    #[test]
    fn test_advisory_failure_is_warning() {
        let results = vec![
            exited("test", 0, FailPolicy::HardFail),
            exited("docs", 1, FailPolicy::Advisory),
        ];

        let verdict = CiGate::evaluate(&results);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.warnings.len(), 1);
        assert!(verdict.warnings[0].contains("docs"));
    }

    #[test]
    fn test_errored_job_is_violation() {
        let results = vec![errored(
            "msrv_build",
            ErrorReason::Provisioning {
                message: "no such release".to_string(),
            },
        )];

        let verdict = CiGate::evaluate(&results);
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("errored: provisioning"));
    }

    #[test]
    fn test_cancelled_job_is_violation() {
        let verdict = CiGate::evaluate(&[errored("lint", ErrorReason::Cancelled)]);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations[0], "Job 'lint' errored: cancelled");
    }
}
