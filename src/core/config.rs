//! Pipeline and engine configuration from YAML

use crate::core::{Edge, PipelineDefinition, Step};
use crate::handlers::HandlerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Pipeline file as written by authors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline id; derived from the name when omitted
    #[serde(default)]
    pub id: Option<String>,

    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Pipeline steps in declaration order
    pub steps: Vec<Step>,

    /// Dependencies between steps
    #[serde(default)]
    pub edges: Vec<Edge>,

    /// Handlers keyed by role
    #[serde(default)]
    pub handlers: HashMap<String, HandlerConfig>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject files that cannot form a pipeline at all
    ///
    /// Graph problems (cycles, dangling edges) are not errors here; the
    /// compiler reports them as issues.
    pub fn validate(&self) -> Result<()> {
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                anyhow::bail!("Step with role '{}' has an empty id", step.role);
            }
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
        }
        Ok(())
    }

    pub fn pipeline_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| slugify(&self.name))
    }

    /// Build the pipeline definition
    pub fn to_pipeline(&self) -> PipelineDefinition {
        PipelineDefinition {
            id: self.pipeline_id(),
            name: self.name.clone(),
            steps: self.steps.clone(),
            edges: self.edges.clone(),
        }
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each run's event channel; slow subscribers lose the oldest events
    pub event_buffer: usize,

    /// How long terminal runs stay in the registry
    pub retention_secs: u64,

    /// How often the registry sweeps expired runs
    pub sweep_interval_secs: u64,

    /// Character cap applied before summarizing parent outputs
    pub summary_max_chars: usize,

    /// Refuse to start pipelines whose plan has issues
    pub strict_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            retention_secs: 3600,
            sweep_interval_secs: 60,
            summary_max_chars: 4000,
            strict_validation: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        if config.event_buffer == 0 {
            anyhow::bail!("event_buffer must be at least 1");
        }
        Ok(config)
    }
}
