//! Toolchain selectors and the source trait that resolves and installs them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProvisioningResult;

/// Which toolchain a job wants.
///
/// Serialises as `"latest_stable"` or `{ pinned = "1.39.0" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// A fixed release, typically the minimum supported version.
    Pinned(String),
    /// Whatever the stable channel points at when the run resolves it.
    LatestStable,
}

impl VersionSelector {
    /// Shorthand for `VersionSelector::Pinned`.
    pub fn pinned(version: impl Into<String>) -> Self {
        VersionSelector::Pinned(version.into())
    }

    /// Channel name as understood by the dist server.
    pub fn channel(&self) -> &str {
        match self {
            VersionSelector::Pinned(v) => v,
            VersionSelector::LatestStable => "stable",
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel())
    }
}

/// A selector resolved to a concrete release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedToolchain {
    /// Concrete version, e.g. `1.39.0`.
    pub version: String,
    /// Components shipped for this release on the host.
    pub available_components: BTreeSet<String>,
}

impl ResolvedToolchain {
    pub fn new<I, S>(version: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            available_components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `component` ships with this release.
    pub fn has_component(&self, component: &str) -> bool {
        self.available_components.contains(component)
    }
}

/// Handle to an installed toolchain, as returned by a [`ToolchainSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationHandle {
    /// Installed version.
    pub version: String,
    /// Installation root, when the source installs to a known location.
    pub root: Option<PathBuf>,
    /// Environment variables a process needs to run against this install.
    pub vars: BTreeMap<String, String>,
}

impl InstallationHandle {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            root: None,
            vars: BTreeMap::new(),
        }
    }

    /// Add an environment variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Set the installation root.
    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }
}

/// Where toolchains come from.
///
/// Implementations perform network or filesystem I/O; they are the only I/O
/// boundary of the provisioner.
#[async_trait]
pub trait ToolchainSource: Send + Sync {
    /// Resolve a selector to a concrete release.
    async fn resolve(&self, selector: &VersionSelector) -> ProvisioningResult<ResolvedToolchain>;

    /// Install a resolved release together with `components`.
    async fn install(
        &self,
        toolchain: &ResolvedToolchain,
        components: &BTreeSet<String>,
    ) -> ProvisioningResult<InstallationHandle>;
}
