//! Retrieval contract and weight normalization

use crate::core::{RetrievalConfig, RunState};
use crate::handlers::HandlerError;
use async_trait::async_trait;

const DEFAULT_WEIGHT: f64 = 0.5;

/// Normalized retrieval settings for one step
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    pub graph_weight: f64,
    pub vector_weight: f64,
    pub categories: Vec<String>,
    pub max_hops: Option<u32>,
}

impl RetrievalPlan {
    /// Normalize a step's retrieval config
    ///
    /// Weights are clamped to `[0, 1]` and rescaled to sum to 1. A zero sum
    /// (or no weights at all) yields an even split.
    pub fn from_config(config: Option<&RetrievalConfig>) -> Self {
        let (graph_weight, vector_weight) = normalize_weights(
            config.and_then(|c| c.graph_weight),
            config.and_then(|c| c.vector_weight),
        );
        Self {
            graph_weight,
            vector_weight,
            categories: config.map(|c| c.categories.clone()).unwrap_or_default(),
            max_hops: config.and_then(|c| c.max_hops),
        }
    }

    /// A zero weight skips the graph path entirely
    pub fn uses_graph(&self) -> bool {
        self.graph_weight > 0.0
    }

    /// A zero weight skips the vector path entirely
    pub fn uses_vector(&self) -> bool {
        self.vector_weight > 0.0
    }
}

pub fn normalize_weights(graph: Option<f64>, vector: Option<f64>) -> (f64, f64) {
    if graph.is_none() && vector.is_none() {
        return (DEFAULT_WEIGHT, DEFAULT_WEIGHT);
    }

    let clamp = |w: Option<f64>| {
        let w = w.unwrap_or(0.0);
        if w.is_nan() {
            0.0
        } else {
            w.clamp(0.0, 1.0)
        }
    };
    let (g, v) = (clamp(graph), clamp(vector));
    let sum = g + v;
    if sum <= 0.0 {
        return (DEFAULT_WEIGHT, DEFAULT_WEIGHT);
    }
    (g / sum, v / sum)
}

/// Everything a retriever gets to look up context for one step
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub step_id: &'a str,
    pub role: &'a str,
    pub goal: &'a str,
    pub merged_input: &'a str,
    pub plan: &'a RetrievalPlan,
    pub state: &'a RunState,
}

/// Looks up context snippets for a step
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<Vec<String>, HandlerError>;
}

/// Retriever that never returns context
#[derive(Debug, Clone, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn retrieve(&self, _request: RetrievalRequest<'_>) -> Result<Vec<String>, HandlerError> {
        Ok(Vec::new())
    }
}
