//! Verification job definitions.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolchain_provisioner::VersionSelector;

/// Minimum supported Rust version checked by the builtin MSRV job.
pub const DEFAULT_MSRV: &str = "1.39.0";

/// Whether a job's failure fails the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    #[default]
    HardFail,
    Advisory,
}

impl FailPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            FailPolicy::HardFail => "hard_fail",
            FailPolicy::Advisory => "advisory",
        }
    }
}

/// One independently executable verification job.
///
/// Immutable once built; the `with_*` methods consume and return the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    name: String,

    toolchain: VersionSelector,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    components: BTreeSet<String>,

    /// Shell command run inside the checkout.
    command: String,

    #[serde(default)]
    fail_policy: FailPolicy,

    /// Internal timeout; the orchestrator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl JobSpec {
    pub fn new(
        name: impl Into<String>,
        toolchain: VersionSelector,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            toolchain,
            components: BTreeSet::new(),
            command: command.into(),
            fail_policy: FailPolicy::HardFail,
            timeout_secs: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    /// Mark the job advisory: its failure is reported but does not gate.
    pub fn advisory(self) -> Self {
        self.with_fail_policy(FailPolicy::Advisory)
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn toolchain(&self) -> &VersionSelector {
        &self.toolchain
    }

    pub fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Timeout to enforce, falling back to `default`.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Builtin Rust verification jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinJob {
    /// cargo build --verbose on the minimum supported version
    MsrvBuild,

    /// cargo fmt --all -- --check on stable
    CheckFmt,

    /// cargo test --verbose on stable
    Test,

    /// cargo clippy -- -D warnings on stable
    Lint,
}

impl BuiltinJob {
    pub const ALL: [BuiltinJob; 4] = [
        BuiltinJob::MsrvBuild,
        BuiltinJob::CheckFmt,
        BuiltinJob::Test,
        BuiltinJob::Lint,
    ];

    /// Get the job name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinJob::MsrvBuild => "msrv_build",
            BuiltinJob::CheckFmt => "check_fmt",
            BuiltinJob::Test => "test",
            BuiltinJob::Lint => "lint",
        }
    }

    /// Get the job's command.
    pub fn command(&self) -> &'static str {
        match self {
            BuiltinJob::MsrvBuild => "cargo build --verbose",
            BuiltinJob::CheckFmt => "cargo fmt --all -- --check",
            BuiltinJob::Test => "cargo test --verbose",
            BuiltinJob::Lint => "cargo clippy -- -D warnings",
        }
    }

    pub fn toolchain(&self) -> VersionSelector {
        match self {
            BuiltinJob::MsrvBuild => VersionSelector::pinned(DEFAULT_MSRV),
            _ => VersionSelector::LatestStable,
        }
    }

    /// Component the job needs beyond the compiler, if any.
    pub fn component(&self) -> Option<&'static str> {
        match self {
            BuiltinJob::CheckFmt => Some("rustfmt"),
            BuiltinJob::Lint => Some("clippy"),
            _ => None,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            BuiltinJob::CheckFmt => 300,
            BuiltinJob::Lint => 600,
            BuiltinJob::MsrvBuild | BuiltinJob::Test => 1200,
        }
    }

    /// Build the job spec.
    pub fn spec(&self) -> JobSpec {
        let spec = JobSpec::new(self.name(), self.toolchain(), self.command())
            .with_timeout_secs(self.timeout_secs());
        match self.component() {
            Some(component) => spec.with_component(component),
            None => spec,
        }
    }
}

impl std::str::FromStr for BuiltinJob {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinJob::ALL
            .into_iter()
            .find(|job| job.name() == s.trim())
            .ok_or_else(|| format!("unknown builtin job: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_job_names() {
        assert_eq!(BuiltinJob::MsrvBuild.name(), "msrv_build");
        assert_eq!(BuiltinJob::CheckFmt.name(), "check_fmt");
        assert_eq!(BuiltinJob::Test.name(), "test");
        assert_eq!(BuiltinJob::Lint.name(), "lint");
    }

    #[test]
    fn test_builtin_toolchains() {
        assert_eq!(
            BuiltinJob::MsrvBuild.toolchain(),
            VersionSelector::pinned("1.39.0")
        );
        assert_eq!(BuiltinJob::Lint.toolchain(), VersionSelector::LatestStable);
    }

    #[test]
    fn test_builtin_components() {
        assert!(BuiltinJob::CheckFmt.spec().components().contains("rustfmt"));
        assert!(BuiltinJob::Lint.spec().components().contains("clippy"));
        assert!(BuiltinJob::Test.spec().components().is_empty());
        assert!(BuiltinJob::MsrvBuild.spec().components().is_empty());
    }

    #[test]
    fn test_builtin_from_str() {
        assert_eq!("lint".parse::<BuiltinJob>().unwrap(), BuiltinJob::Lint);
        assert!("deploy".parse::<BuiltinJob>().is_err());
    }

    #[test]
    fn test_job_spec_defaults() {
        let spec = JobSpec::new("custom", VersionSelector::LatestStable, "echo hi");
        assert_eq!(spec.fail_policy(), FailPolicy::HardFail);
        assert_eq!(spec.timeout_secs(), None);
        assert_eq!(
            spec.effective_timeout(Duration::from_secs(42)),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn test_job_spec_advisory_and_timeout() {
        let spec = JobSpec::new("docs", VersionSelector::LatestStable, "cargo doc")
            .advisory()
            .with_timeout_secs(5);
        assert_eq!(spec.fail_policy(), FailPolicy::Advisory);
        assert_eq!(
            spec.effective_timeout(Duration::from_secs(42)),
            Duration::from_secs(5)
        );
    }
}
