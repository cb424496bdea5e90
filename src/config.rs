//! Configuration loader — optional YAML file selecting which stages run
//! and in what order. Absent file means the full default pipeline.

use crate::pipeline::{Pipeline, StageId, DEFAULT_STAGES};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Stage sequence, in execution order. Stage names are the
    /// snake_case identifiers (`newlines`, `utf7`, `js_unicode`, ...).
    #[serde(default = "default_stages")]
    pub stages: Vec<StageId>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
        }
    }
}

fn default_stages() -> Vec<StageId> {
    DEFAULT_STAGES.to_vec()
}

impl PipelineConfig {
    /// Load config from a YAML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: &str) -> Result<Self> {
        let p = Path::new(path);
        if !p.exists() {
            tracing::warn!(path = %path, "config file not found, using default stage order");
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(p).with_context(|| format!("reading config file: {}", path))?;

        let config: Self =
            serde_yaml::from_str(&contents).with_context(|| "parsing config YAML")?;

        if config.stages.is_empty() {
            tracing::warn!(path = %path, "config lists no stages, output will equal input");
        }

        Ok(config)
    }

    /// Build the pipeline this config describes.
    pub fn build(&self) -> Pipeline {
        Pipeline::with_stages(self.stages.clone())
    }
}
