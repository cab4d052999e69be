//! Toolchain-Provisioner: isolated Rust toolchains for verification jobs
//!
//! This crate resolves toolchain selectors (a pinned minimum supported
//! version, or whatever stable is today) to concrete releases, installs them
//! with the requested components, and hands each job its own
//! [`ToolchainEnvironment`].
//!
//! ## Layout
//!
//! - [`source`]: selectors and the [`ToolchainSource`] seam
//! - [`rustup`]: live source (dist server manifests + `rustup`)
//! - [`provisioner`]: per-run sessions and environment lifetime
//! - [`fakes`]: in-memory source for tests

pub mod error;
pub mod fakes;
pub mod manifest;
pub mod provisioner;
pub mod rustup;
pub mod source;

pub use error::{ManifestError, ProvisioningError, ProvisioningResult};
pub use manifest::ChannelManifest;
pub use provisioner::{ProvisioningSession, ToolchainEnvironment, ToolchainProvisioner};
pub use rustup::{RustupConfig, RustupSource};
pub use source::{InstallationHandle, ResolvedToolchain, ToolchainSource, VersionSelector};
