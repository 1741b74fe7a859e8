//! storyflow - pipeline execution engine for multi-step writing generation graphs

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod persistence;
pub mod registry;

// Re-export commonly used types
pub use crate::core::config::{EngineConfig, PipelineConfig};
pub use crate::core::{
    Edge, InputsMode, PipelineDefinition, RunResult, RunState, RunStatus, RunStatusView, Step,
    StepOutput,
};
pub use error::EngineError;
pub use execution::{EngineBuilder, ExecutionEngine, Plan, PlanTarget, Stage};
pub use handlers::{
    handler_fn, EchoHandler, HandlerError, HandlerRegistry, Retriever, StepHandler, Summarizer,
};
pub use persistence::{InMemoryPersistence, PersistenceBackend, RunRecord};
pub use registry::{RunEvent, RunEventEnvelope, RunSubscription};
