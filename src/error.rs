//! Engine error types

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engine to its host
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration defect, such as a role with no registered handler
    #[error("configuration error: {0}")]
    Config(String),

    /// A handler, retriever or summarizer call failed
    #[error("step '{step_id}' failed: {message}")]
    Execution { step_id: String, message: String },

    /// The pipeline did not compile cleanly and strict validation is on
    #[error("pipeline has validation issues: {}", .0.join("; "))]
    InvalidPipeline(Vec<String>),

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {0} has not finished")]
    RunNotFinished(Uuid),

    #[error("run cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl EngineError {
    pub fn execution(step_id: &str, message: impl Into<String>) -> Self {
        EngineError::Execution {
            step_id: step_id.to_string(),
            message: message.into(),
        }
    }
}
