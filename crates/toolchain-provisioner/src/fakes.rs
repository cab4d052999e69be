//! In-memory fake toolchain source (testing only)
//!
//! `MemoryToolchainSource` satisfies the [`ToolchainSource`] contract without
//! touching the network or rustup, so pipelines can be exercised end to end
//! in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::source::{InstallationHandle, ResolvedToolchain, ToolchainSource, VersionSelector};

/// Toolchain source backed by a fixed table of releases.
#[derive(Debug, Default)]
pub struct MemoryToolchainSource {
    versions: BTreeMap<String, BTreeSet<String>>,
    stable: Option<String>,
    failing_installs: BTreeSet<String>,
    resolve_calls: AtomicUsize,
    install_calls: AtomicUsize,
    install_delay: Duration,
    installs_in_flight: AtomicUsize,
    max_concurrent_installs: AtomicUsize,
}

impl MemoryToolchainSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a release and the components it ships.
    pub fn with_version<I, S>(mut self, version: &str, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions.insert(
            version.to_string(),
            components.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Declare a release and make it what `latest_stable` resolves to.
    pub fn with_stable<I, S>(mut self, version: &str, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stable = Some(version.to_string());
        self.with_version(version, components)
    }

    /// Make installing `version` fail.
    pub fn with_install_failure(mut self, version: &str) -> Self {
        self.failing_installs.insert(version.to_string());
        self
    }

    /// Make every install take `delay`.
    pub fn with_install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = delay;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    /// Most installs that were ever running at the same time.
    pub fn max_concurrent_installs(&self) -> usize {
        self.max_concurrent_installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolchainSource for MemoryToolchainSource {
    async fn resolve(&self, selector: &VersionSelector) -> ProvisioningResult<ResolvedToolchain> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        let version = match selector {
            VersionSelector::Pinned(v) => Some(v.clone()),
            VersionSelector::LatestStable => self.stable.clone(),
        };

        version
            .and_then(|v| {
                self.versions
                    .get(&v)
                    .map(|components| ResolvedToolchain::new(v.clone(), components.iter().cloned()))
            })
            .ok_or_else(|| ProvisioningError::UnresolvableVersion {
                selector: selector.to_string(),
                reason: "no such release".to_string(),
            })
    }

    async fn install(
        &self,
        toolchain: &ResolvedToolchain,
        _components: &BTreeSet<String>,
    ) -> ProvisioningResult<InstallationHandle> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);

        let in_flight = self.installs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_installs.fetch_max(in_flight, Ordering::SeqCst);
        if !self.install_delay.is_zero() {
            tokio::time::sleep(self.install_delay).await;
        }
        self.installs_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_installs.contains(&toolchain.version) {
            return Err(ProvisioningError::InstallFailure {
                version: toolchain.version.clone(),
                reason: "simulated install failure".to_string(),
            });
        }

        Ok(InstallationHandle::new(toolchain.version.clone())
            .with_var("RUSTUP_TOOLCHAIN", toolchain.version.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_stable_alias() {
        let source = MemoryToolchainSource::new()
            .with_version("1.39.0", ["rust"])
            .with_stable("1.80.1", ["rust", "clippy"]);

        let resolved = source.resolve(&VersionSelector::LatestStable).await.unwrap();
        assert_eq!(resolved.version, "1.80.1");
        assert!(resolved.has_component("clippy"));
        assert_eq!(source.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_stable_declared() {
        let source = MemoryToolchainSource::new().with_version("1.39.0", ["rust"]);
        let err = source.resolve(&VersionSelector::LatestStable).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::UnresolvableVersion { .. }));
    }

    #[tokio::test]
    async fn test_install_failure() {
        let source = MemoryToolchainSource::new()
            .with_version("1.39.0", ["rust"])
            .with_install_failure("1.39.0");
        let resolved = source.resolve(&VersionSelector::pinned("1.39.0")).await.unwrap();

        let err = source.install(&resolved, &BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::InstallFailure { .. }));
        assert_eq!(source.install_calls(), 1);
    }
}
