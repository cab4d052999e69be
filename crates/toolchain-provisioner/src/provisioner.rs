//! Provisioning of isolated, per-job toolchain environments.
//!
//! A [`ToolchainProvisioner`] is long-lived. Each pipeline run opens a
//! [`ProvisioningSession`], whose resolution cache guarantees that every job
//! in the run asking for the same selector sees the same concrete release.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::source::{ResolvedToolchain, ToolchainSource, VersionSelector};

/// Hands out toolchain environments and tracks how many are alive.
#[derive(Clone)]
pub struct ToolchainProvisioner {
    source: Arc<dyn ToolchainSource>,
    live: Arc<AtomicUsize>,
}

impl ToolchainProvisioner {
    pub fn new(source: Arc<dyn ToolchainSource>) -> Self {
        Self {
            source,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open a session scoped to one pipeline run.
    pub fn session(&self) -> ProvisioningSession {
        ProvisioningSession {
            source: Arc::clone(&self.source),
            live: Arc::clone(&self.live),
            resolved: Mutex::new(HashMap::new()),
            installs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of environments provisioned and not yet released.
    pub fn live_environments(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Per-run provisioning state.
pub struct ProvisioningSession {
    source: Arc<dyn ToolchainSource>,
    live: Arc<AtomicUsize>,
    resolved: Mutex<HashMap<VersionSelector, Arc<OnceCell<ResolvedToolchain>>>>,
    installs: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProvisioningSession {
    /// Resolve a selector, at most once per session.
    ///
    /// Concurrent callers for the same selector wait on the same resolution.
    /// Failed resolutions are not cached.
    pub async fn resolve(&self, selector: &VersionSelector) -> ProvisioningResult<ResolvedToolchain> {
        let cell = {
            let mut resolved = self.resolved.lock().await;
            Arc::clone(resolved.entry(selector.clone()).or_default())
        };

        cell.get_or_try_init(|| self.source.resolve(selector))
            .await
            .cloned()
    }

    /// Installs of the same release within a session run one at a time.
    async fn install_lock(&self, version: &str) -> Arc<Mutex<()>> {
        let mut installs = self.installs.lock().await;
        Arc::clone(installs.entry(version.to_string()).or_default())
    }

    /// Provision an environment for exactly one job.
    #[instrument(skip(self, selector, components), fields(selector = %selector))]
    pub async fn provision(
        &self,
        job_name: &str,
        selector: &VersionSelector,
        components: &BTreeSet<String>,
    ) -> ProvisioningResult<ToolchainEnvironment> {
        let toolchain = self.resolve(selector).await?;

        if let Some(missing) = components.iter().find(|c| !toolchain.has_component(c)) {
            return Err(ProvisioningError::MissingComponent {
                component: missing.clone(),
                version: toolchain.version.clone(),
            });
        }

        let handle = {
            let lock = self.install_lock(&toolchain.version).await;
            let _guard = lock.lock().await;
            self.source.install(&toolchain, components).await?
        };

        let scratch = tempfile::Builder::new()
            .prefix(&scratch_prefix(job_name))
            .tempdir()
            .map_err(|e| ProvisioningError::InstallFailure {
                version: toolchain.version.clone(),
                reason: format!("cannot create scratch directory: {e}"),
            })?;

        let mut vars = handle.vars;
        vars.insert(
            "CARGO_TARGET_DIR".to_string(),
            scratch.path().join("target").to_string_lossy().into_owned(),
        );

        self.live.fetch_add(1, Ordering::SeqCst);
        info!(job = %job_name, version = %toolchain.version, "provisioned toolchain environment");

        Ok(ToolchainEnvironment {
            job_name: job_name.to_string(),
            version: toolchain.version,
            components: components.clone(),
            vars,
            scratch,
            live: Arc::clone(&self.live),
        })
    }
}

/// Job names are free text; keep only characters that are safe in a file name.
fn scratch_prefix(job_name: &str) -> String {
    let name: String = job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("verify-{name}-")
}

/// A provisioned toolchain bound to a single job execution.
///
/// Not `Clone`: the environment is owned by the job that asked for it and is
/// released (scratch directory removed, live count decremented) when dropped,
/// whether the job finished, failed, timed out or was cancelled.
#[derive(Debug)]
pub struct ToolchainEnvironment {
    job_name: String,
    version: String,
    components: BTreeSet<String>,
    vars: BTreeMap<String, String>,
    scratch: TempDir,
    live: Arc<AtomicUsize>,
}

impl ToolchainEnvironment {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Concrete toolchain version.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    /// Variables to set on every process run in this environment.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Private scratch space; build output goes here, never into the checkout.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

impl Drop for ToolchainEnvironment {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(job = %self.job_name, version = %self.version, "released toolchain environment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryToolchainSource;
    use std::time::Duration;

    fn components(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn provisioner() -> (Arc<MemoryToolchainSource>, ToolchainProvisioner) {
        let source = Arc::new(
            MemoryToolchainSource::new()
                .with_version("1.39.0", ["rust"])
                .with_stable("1.80.1", ["rust", "rustfmt", "clippy"]),
        );
        let provisioner = ToolchainProvisioner::new(source.clone());
        (source, provisioner)
    }

    #[tokio::test]
    async fn test_provision_pins_toolchain_and_target_dir() {
        let (_, provisioner) = provisioner();
        let session = provisioner.session();

        let env = session
            .provision("msrv_build", &VersionSelector::pinned("1.39.0"), &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(env.version(), "1.39.0");
        assert_eq!(env.vars()["RUSTUP_TOOLCHAIN"], "1.39.0");
        assert!(env.vars()["CARGO_TARGET_DIR"].starts_with(&*env.scratch_dir().to_string_lossy()));
        assert_eq!(provisioner.live_environments(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_environment() {
        let (_, provisioner) = provisioner();
        let session = provisioner.session();

        let env = session
            .provision("test", &VersionSelector::LatestStable, &BTreeSet::new())
            .await
            .unwrap();
        let scratch = env.scratch_dir().to_path_buf();
        assert!(scratch.exists());

        drop(env);
        assert_eq!(provisioner.live_environments(), 0);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_missing_component() {
        let (source, provisioner) = provisioner();
        let session = provisioner.session();

        let err = session
            .provision("lint", &VersionSelector::pinned("1.39.0"), &components(&["clippy"]))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProvisioningError::MissingComponent {
                component: "clippy".to_string(),
                version: "1.39.0".to_string(),
            }
        );
        assert_eq!(source.install_calls(), 0);
        assert_eq!(provisioner.live_environments(), 0);
    }

    #[tokio::test]
    async fn test_unknown_version_is_unresolvable() {
        let (_, provisioner) = provisioner();
        let err = provisioner
            .session()
            .provision("msrv_build", &VersionSelector::pinned("0.0.1"), &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::UnresolvableVersion { .. }));
    }

    #[tokio::test]
    async fn test_session_resolves_each_selector_once() {
        let (source, provisioner) = provisioner();
        let session = provisioner.session();

        let fmt_components = components(&["rustfmt"]);
        let no_components = BTreeSet::new();
        let lint_components = components(&["clippy"]);
        let (a, b, c) = tokio::join!(
            session.provision("check_fmt", &VersionSelector::LatestStable, &fmt_components),
            session.provision("test", &VersionSelector::LatestStable, &no_components),
            session.provision("lint", &VersionSelector::LatestStable, &lint_components),
        );
        assert_eq!(a.unwrap().version(), "1.80.1");
        assert_eq!(b.unwrap().version(), "1.80.1");
        assert_eq!(c.unwrap().version(), "1.80.1");
        assert_eq!(source.resolve_calls(), 1);

        // A new run resolves again.
        provisioner.session().resolve(&VersionSelector::LatestStable).await.unwrap();
        assert_eq!(source.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn test_environments_are_not_shared() {
        let (_, provisioner) = provisioner();
        let session = provisioner.session();

        let a = session
            .provision("test", &VersionSelector::LatestStable, &BTreeSet::new())
            .await
            .unwrap();
        let b = session
            .provision("lint", &VersionSelector::LatestStable, &BTreeSet::new())
            .await
            .unwrap();

        assert_ne!(a.scratch_dir(), b.scratch_dir());
        assert_eq!(provisioner.live_environments(), 2);
    }

    #[tokio::test]
    async fn test_installs_of_one_release_do_not_overlap() {
        let source = Arc::new(
            MemoryToolchainSource::new()
                .with_stable("1.80.1", ["rust", "rustfmt", "clippy"])
                .with_install_delay(Duration::from_millis(50)),
        );
        let provisioner = ToolchainProvisioner::new(source.clone());
        let session = provisioner.session();

        let fmt_components = components(&["rustfmt"]);
        let no_components = BTreeSet::new();
        let lint_components = components(&["clippy"]);
        let (a, b, c) = tokio::join!(
            session.provision("check_fmt", &VersionSelector::LatestStable, &fmt_components),
            session.provision("test", &VersionSelector::LatestStable, &no_components),
            session.provision("lint", &VersionSelector::LatestStable, &lint_components),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.install_calls(), 3);
        assert_eq!(source.max_concurrent_installs(), 1);
    }

    #[tokio::test]
    async fn test_job_name_with_path_separator() {
        let (_, provisioner) = provisioner();
        let session = provisioner.session();

        let env = session
            .provision("build/linux", &VersionSelector::LatestStable, &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(env.job_name(), "build/linux");
        assert!(env.scratch_dir().is_dir());
        assert_eq!(env.scratch_dir().parent(), Some(std::env::temp_dir().as_path()));
    }

    #[test]
    fn test_scratch_prefix() {
        assert_eq!(scratch_prefix("msrv_build"), "verify-msrv_build-");
        assert_eq!(scratch_prefix("build/linux"), "verify-build_linux-");
        assert_eq!(scratch_prefix("../x y"), "verify-___x_y-");
    }
}
