//! Pipeline configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MtError, MtResult};
use crate::prompts::DEFAULT_STYLE_HINTS;

/// Tunables for one pipeline run
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project identifier used to scope translation memory
    pub project_id: String,
    /// Minimum similarity (0-100) for a fuzzy memory hit to replace generation
    pub fuzzy_threshold: f64,
    /// Maximum full-text candidates re-ranked per fuzzy lookup
    pub fuzzy_candidate_cap: usize,
    /// Risk score at which the review pass runs
    pub review_risk_threshold: u32,
    pub generator_timeout_secs: u64,
    /// Extra attempts after a transient generator failure
    pub generator_retries: u32,
    /// Rows processed in parallel by a batch
    pub batch_concurrency: usize,
    pub style_hints: String,
    pub include_global_glossary: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            project_id: "default".to_string(),
            fuzzy_threshold: 92.0,
            fuzzy_candidate_cap: 50,
            review_risk_threshold: 5,
            generator_timeout_secs: 30,
            generator_retries: 1,
            batch_concurrency: 4,
            style_hints: DEFAULT_STYLE_HINTS.to_string(),
            include_global_glossary: true,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> MtResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> MtResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> MtResult<()> {
        if !(0.0..=100.0).contains(&self.fuzzy_threshold) {
            return Err(MtError::Config(format!(
                "fuzzy_threshold must be between 0 and 100, got {}",
                self.fuzzy_threshold
            )));
        }
        if self.fuzzy_candidate_cap == 0 {
            return Err(MtError::Config(
                "fuzzy_candidate_cap must be at least 1".to_string(),
            ));
        }
        if self.batch_concurrency == 0 {
            return Err(MtError::Config(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.generator_timeout_secs == 0 {
            return Err(MtError::Config(
                "generator_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.project_id.trim().is_empty() {
            return Err(MtError::Config("project_id cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }
}
