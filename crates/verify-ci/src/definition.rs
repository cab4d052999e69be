//! Pipeline definition and identity.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::error::DefinitionError;
use crate::job::{BuiltinJob, JobSpec};
use crate::trigger::TriggerConditions;

/// A validated, ordered set of jobs plus the events that start them.
///
/// Only constructible through [`PipelineDefinition::new`] (or the builtin
/// constructor), so a value of this type always has at least one job and
/// unique job names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    name: String,
    trigger: TriggerConditions,
    jobs: Vec<JobSpec>,
}

impl PipelineDefinition {
    /// Validate and build a pipeline definition.
    pub fn new(
        name: impl Into<String>,
        trigger: TriggerConditions,
        jobs: Vec<JobSpec>,
    ) -> Result<Self, DefinitionError> {
        if jobs.is_empty() {
            return Err(DefinitionError::EmptyPipeline);
        }
        if trigger.events.is_empty() {
            return Err(DefinitionError::NoTriggerEvents);
        }

        let mut seen = HashSet::new();
        for job in &jobs {
            if job.name().trim().is_empty() {
                return Err(DefinitionError::EmptyJobName);
            }
            if job.command().trim().is_empty() {
                return Err(DefinitionError::EmptyCommand {
                    job: job.name().to_string(),
                });
            }
            if !seen.insert(job.name()) {
                return Err(DefinitionError::DuplicateJobName {
                    name: job.name().to_string(),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            trigger,
            jobs,
        })
    }

    /// The reference Rust pipeline: MSRV build, fmt check, tests and clippy,
    /// on push and pull request.
    pub fn default_rust() -> Self {
        Self {
            name: "rust".to_string(),
            trigger: TriggerConditions::push_and_pull_request(),
            jobs: BuiltinJob::ALL.iter().map(BuiltinJob::spec).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &TriggerConditions {
        &self.trigger
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// SHA-256 digest of the ordered jobs (deterministic, order sensitive).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for job in &self.jobs {
            hasher.update(job.name().as_bytes());
            hasher.update(b"\0");
            hasher.update(job.toolchain().to_string().as_bytes());
            hasher.update(b"\0");
            for component in job.components() {
                hasher.update(component.as_bytes());
                hasher.update(b",");
            }
            hasher.update(b"\0");
            hasher.update(job.command().as_bytes());
            hasher.update(b"\0");
            hasher.update(job.fail_policy().name().as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::EventKind;
    use toolchain_provisioner::VersionSelector;

    fn job(name: &str) -> JobSpec {
        JobSpec::new(name, VersionSelector::LatestStable, "cargo test")
    }

    #[test]
    fn test_duplicate_job_name() {
        let err = PipelineDefinition::new(
            "ci",
            TriggerConditions::push_and_pull_request(),
            vec![job("test"), job("lint"), job("test")],
        )
        .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::DuplicateJobName {
                name: "test".to_string()
            }
        );
    }

    #[test]
    fn test_empty_pipeline() {
        let err = PipelineDefinition::new("ci", TriggerConditions::push_and_pull_request(), vec![])
            .unwrap_err();
        assert_eq!(err, DefinitionError::EmptyPipeline);
    }

    #[test]
    fn test_empty_command() {
        let err = PipelineDefinition::new(
            "ci",
            TriggerConditions::push_and_pull_request(),
            vec![JobSpec::new("noop", VersionSelector::LatestStable, "   ")],
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyCommand { job } if job == "noop"));
    }

    #[test]
    fn test_empty_job_name() {
        let err = PipelineDefinition::new(
            "ci",
            TriggerConditions::push_and_pull_request(),
            vec![job("")],
        )
        .unwrap_err();
        assert_eq!(err, DefinitionError::EmptyJobName);
    }

    #[test]
    fn test_no_trigger_events() {
        let err = PipelineDefinition::new("ci", TriggerConditions::on([]), vec![job("test")])
            .unwrap_err();
        assert_eq!(err, DefinitionError::NoTriggerEvents);
    }

    #[test]
    fn test_default_rust_pipeline() {
        let pipeline = PipelineDefinition::default_rust();
        let names: Vec<&str> = pipeline.jobs().iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["msrv_build", "check_fmt", "test", "lint"]);
        assert!(pipeline.trigger().events.contains(&EventKind::Push));
        assert!(pipeline.trigger().events.contains(&EventKind::PullRequest));
        assert_eq!(
            pipeline.job("msrv_build").unwrap().toolchain(),
            &VersionSelector::pinned("1.39.0")
        );
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(
            PipelineDefinition::default_rust().digest(),
            PipelineDefinition::default_rust().digest()
        );
        assert_eq!(PipelineDefinition::default_rust().digest().len(), 64);
    }

    #[test]
    fn test_digest_order_sensitive() {
        let trigger = TriggerConditions::push_and_pull_request();
        let a = PipelineDefinition::new("ci", trigger.clone(), vec![job("fmt"), job("check")])
            .unwrap();
        let b = PipelineDefinition::new("ci", trigger, vec![job("check"), job("fmt")]).unwrap();
        assert_ne!(a.digest(), b.digest());
    }
}
