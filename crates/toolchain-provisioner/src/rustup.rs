//! Live toolchain source backed by the Rust dist server and `rustup`.
//!
//! Resolution fetches the channel manifest for the selector; installation
//! shells out to `rustup toolchain install`. The returned handle pins the
//! toolchain through `RUSTUP_TOOLCHAIN`, so a job provisioned for 1.39.0 never
//! picks up the stable proxies even though both live in the same rustup home.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::manifest::ChannelManifest;
use crate::source::{InstallationHandle, ResolvedToolchain, ToolchainSource, VersionSelector};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Rustup source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RustupConfig {
    /// Dist server root (same meaning as rustup's `RUSTUP_DIST_SERVER`)
    pub dist_server: String,
    /// Host target triple used for component availability
    pub host: String,
    /// Path to the rustup binary
    pub rustup_bin: String,
    /// Install profile passed to `rustup toolchain install`
    pub profile: String,
    /// Limit for each manifest request
    pub http_timeout_secs: u64,
}

impl Default for RustupConfig {
    fn default() -> Self {
        RustupConfig {
            dist_server: std::env::var("RUSTUP_DIST_SERVER")
                .unwrap_or_else(|_| "https://static.rust-lang.org".to_string()),
            host: std::env::var("VERIFY_HOST_TRIPLE").unwrap_or_else(|_| default_host_triple()),
            rustup_bin: std::env::var("RUSTUP_BIN").unwrap_or_else(|_| "rustup".to_string()),
            profile: "minimal".to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl RustupConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Point at a different dist server (mirrors, tests)
    pub fn with_dist_server(mut self, dist_server: &str) -> Self {
        self.dist_server = dist_server.trim_end_matches('/').to_string();
        self
    }

    /// Manifest URL for a selector
    pub fn manifest_url(&self, selector: &VersionSelector) -> String {
        format!(
            "{}/dist/channel-rust-{}.toml",
            self.dist_server.trim_end_matches('/'),
            selector.channel()
        )
    }
}

/// Best-effort host triple for the running binary.
pub fn default_host_triple() -> String {
    let arch = std::env::consts::ARCH;
    match std::env::consts::OS {
        "linux" => format!("{arch}-unknown-linux-gnu"),
        "macos" => format!("{arch}-apple-darwin"),
        "windows" => format!("{arch}-pc-windows-msvc"),
        os => format!("{arch}-unknown-{os}"),
    }
}

/// Toolchain source that talks to the dist server and rustup
pub struct RustupSource {
    config: RustupConfig,
    http_client: reqwest::Client,
}

impl RustupSource {
    /// Create a new rustup source
    pub fn new(config: RustupConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("verify-ci/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(RustupSource {
            config,
            http_client,
        })
    }

    /// Create a source from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(RustupConfig::from_env())
    }

    pub fn config(&self) -> &RustupConfig {
        &self.config
    }

    async fn fetch_manifest(&self, selector: &VersionSelector) -> ProvisioningResult<String> {
        let url = self.config.manifest_url(selector);
        debug!(%url, "fetching channel manifest");

        let unresolvable = |reason: String| ProvisioningError::UnresolvableVersion {
            selector: selector.to_string(),
            reason,
        };

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| unresolvable(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(unresolvable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| unresolvable(format!("reading {url} failed: {e}")))
    }
}

#[async_trait]
impl ToolchainSource for RustupSource {
    async fn resolve(&self, selector: &VersionSelector) -> ProvisioningResult<ResolvedToolchain> {
        let body = self.fetch_manifest(selector).await?;
        let manifest = ChannelManifest::parse(&body, &self.config.host).map_err(|e| {
            ProvisioningError::UnresolvableVersion {
                selector: selector.to_string(),
                reason: e.to_string(),
            }
        })?;

        info!(
            selector = %selector,
            version = %manifest.version,
            date = manifest.date.as_deref().unwrap_or("unknown"),
            "resolved toolchain"
        );

        Ok(ResolvedToolchain {
            version: manifest.version,
            available_components: manifest.components,
        })
    }

    async fn install(
        &self,
        toolchain: &ResolvedToolchain,
        components: &BTreeSet<String>,
    ) -> ProvisioningResult<InstallationHandle> {
        let version = &toolchain.version;
        info!(version = %version, components = ?components, "installing toolchain");

        let mut command = Command::new(&self.config.rustup_bin);
        command
            .args(["toolchain", "install", version.as_str()])
            .args(["--profile", self.config.profile.as_str()])
            .arg("--no-self-update")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for component in components {
            command.args(["--component", component.as_str()]);
        }

        let output = command
            .output()
            .await
            .map_err(|e| ProvisioningError::InstallFailure {
                version: version.clone(),
                reason: format!("failed to launch {}: {e}", self.config.rustup_bin),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(version = %version, "rustup install failed: {}", stderr.trim());
            return Err(ProvisioningError::InstallFailure {
                version: version.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(InstallationHandle::new(version.clone()).with_var("RUSTUP_TOOLCHAIN", version.clone()))
    }
}
