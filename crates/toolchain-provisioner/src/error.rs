//! Error types for toolchain-provisioner

use thiserror::Error;

/// Errors that can occur while provisioning a toolchain for a job.
///
/// All variants are local to one job: the orchestrator reports them as an
/// errored job and never lets them abort sibling jobs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// The version selector could not be resolved to a concrete release
    #[error("cannot resolve toolchain '{selector}': {reason}")]
    UnresolvableVersion { selector: String, reason: String },

    /// A requested component is not shipped for the resolved release
    #[error("component '{component}' is not available for toolchain {version}")]
    MissingComponent { component: String, version: String },

    /// Installing the resolved release failed
    #[error("failed to install toolchain {version}: {reason}")]
    InstallFailure { version: String, reason: String },
}

/// Errors raised while reading a channel manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest is not valid TOML or has an unexpected shape
    #[error("invalid channel manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// Manifest has no `pkg.rust` entry
    #[error("channel manifest has no rust package")]
    MissingRustPackage,

    /// `pkg.rust.version` is empty
    #[error("malformed rust version string: '{0}'")]
    MalformedVersion(String),
}

/// Result type for provisioning operations
pub type ProvisioningResult<T> = std::result::Result<T, ProvisioningError>;
