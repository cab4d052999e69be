//! Rust release channel manifests (`channel-rust-*.toml`).
//!
//! Only the parts needed for resolution are read: the rust package version,
//! per-host availability of every package, and the `renames` table that maps
//! short component names (`rustfmt`) to their package names
//! (`rustfmt-preview`).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::ManifestError;

/// Target key used by packages that are host-independent (e.g. `rust-src`).
const ANY_TARGET: &str = "*";

#[derive(Debug, Deserialize)]
struct RawManifest {
    date: Option<String>,
    #[serde(default)]
    pkg: BTreeMap<String, RawPackage>,
    #[serde(default)]
    renames: BTreeMap<String, RawRename>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    #[serde(default)]
    version: String,
    #[serde(default)]
    target: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    #[serde(default)]
    available: bool,
}

#[derive(Debug, Deserialize)]
struct RawRename {
    to: String,
}

impl RawPackage {
    fn available_for(&self, host: &str) -> bool {
        [host, ANY_TARGET]
            .iter()
            .any(|t| self.target.get(*t).map(|t| t.available).unwrap_or(false))
    }
}

/// The subset of a channel manifest the provisioner cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelManifest {
    /// Concrete release version, e.g. `1.39.0`.
    pub version: String,
    /// Release date, if present.
    pub date: Option<String>,
    /// Package and component names available for the host, including
    /// rename aliases.
    pub components: BTreeSet<String>,
}

impl ChannelManifest {
    /// Parse a manifest, keeping only packages available for `host`.
    pub fn parse(raw: &str, host: &str) -> Result<Self, ManifestError> {
        let manifest: RawManifest = toml::from_str(raw)?;

        let rust = manifest
            .pkg
            .get("rust")
            .ok_or(ManifestError::MissingRustPackage)?;

        // "1.39.0 (4560ea788 2019-11-04)"
        let version = rust
            .version
            .split_whitespace()
            .next()
            .ok_or_else(|| ManifestError::MalformedVersion(rust.version.clone()))?
            .to_string();

        let mut components: BTreeSet<String> = manifest
            .pkg
            .iter()
            .filter(|(_, pkg)| pkg.available_for(host))
            .map(|(name, _)| name.clone())
            .collect();

        let aliases: Vec<String> = manifest
            .renames
            .iter()
            .filter(|(_, rename)| components.contains(&rename.to))
            .map(|(alias, _)| alias.clone())
            .collect();
        components.extend(aliases);

        Ok(Self {
            version,
            date: manifest.date,
            components,
        })
    }
}
