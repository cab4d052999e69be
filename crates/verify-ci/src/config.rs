//! Pipeline configuration files.
//!
//! Pipelines are written as TOML:
//!
//! ```toml
//! name = "rust"
//!
//! [trigger]
//! events = ["push", "pull_request"]
//!
//! [[jobs]]
//! name = "msrv_build"
//! toolchain = { pinned = "1.39.0" }
//! command = "cargo build --verbose"
//!
//! [[jobs]]
//! name = "lint"
//! toolchain = "latest_stable"
//! components = ["clippy"]
//! command = "cargo clippy -- -D warnings"
//! fail_policy = "advisory"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::definition::PipelineDefinition;
use crate::error::DefinitionError;
use crate::job::JobSpec;
use crate::trigger::TriggerConditions;

/// Unvalidated, on-disk form of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub trigger: TriggerConditions,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse pipeline config {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize pipeline config")
    }

    /// Write as TOML, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Validate into a runnable definition.
    pub fn into_definition(self) -> Result<PipelineDefinition, DefinitionError> {
        PipelineDefinition::new(self.name, self.trigger, self.jobs)
    }
}

impl From<&PipelineDefinition> for PipelineConfig {
    fn from(pipeline: &PipelineDefinition) -> Self {
        Self {
            name: pipeline.name().to_string(),
            trigger: pipeline.trigger().clone(),
            jobs: pipeline.jobs().to_vec(),
        }
    }
}

/// Load and validate a pipeline file in one step.
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition> {
    let config = PipelineConfig::load_from(path)?;
    config
        .into_definition()
        .with_context(|| format!("invalid pipeline in {}", path.display()))
}
