//! Step domain model

use serde::{Deserialize, Serialize};

/// A single generation unit in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Role tag selecting the handler that runs this step
    pub role: String,

    /// Optional reference to handler configuration
    #[serde(default, alias = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Disabled steps are left out of the compiled graph
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Explicit position used by the edge-less linear plan
    #[serde(default, alias = "orderIndex", skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,

    /// Retrieval settings for context lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalConfig>,

    /// How parent outputs are combined into this step's input
    #[serde(default, alias = "inputsMode")]
    pub inputs_mode: InputsMode,

    /// Extra input configuration (conditional routing)
    #[serde(default, alias = "inputsConfig", skip_serializing_if = "Option::is_none")]
    pub inputs_config: Option<InputsConfig>,
}

fn default_enabled() -> bool {
    true
}

impl Step {
    /// Create an enabled step with default settings
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            agent_id: None,
            enabled: true,
            order_index: None,
            retrieval: None,
            inputs_mode: InputsMode::default(),
            inputs_config: None,
        }
    }

    pub fn with_inputs_mode(mut self, mode: InputsMode) -> Self {
        self.inputs_mode = mode;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.inputs_config = Some(InputsConfig {
            condition: Some(StepCondition {
                predicate: Some(predicate.into()),
            }),
        });
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The routing predicate, if one is configured and non-blank
    pub fn predicate(&self) -> Option<&str> {
        self.inputs_config
            .as_ref()
            .and_then(|c| c.condition.as_ref())
            .and_then(|c| c.predicate.as_deref())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Fan-in aggregation mode
///
/// Unrecognized mode names fall back to `Concat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputsMode {
    #[default]
    Concat,
    Merge,
    Summary,
    First,
    Last,
}

impl InputsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputsMode::Concat => "concat",
            InputsMode::Merge => "merge",
            InputsMode::Summary => "summary",
            InputsMode::First => "first",
            InputsMode::Last => "last",
        }
    }
}

impl From<String> for InputsMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "merge" => InputsMode::Merge,
            "summary" => InputsMode::Summary,
            "first" => InputsMode::First,
            "last" => InputsMode::Last,
            _ => InputsMode::Concat,
        }
    }
}

impl From<InputsMode> for String {
    fn from(mode: InputsMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Retrieval configuration attached to a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default, alias = "graphWeight", skip_serializing_if = "Option::is_none")]
    pub graph_weight: Option<f64>,

    #[serde(default, alias = "vectorWeight", skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, alias = "maxHops", skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<u32>,
}

/// Optional input configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}
