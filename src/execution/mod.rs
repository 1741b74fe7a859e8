//! Pipeline execution engine

pub mod aggregator;
pub mod compiler;
pub mod coordinator;
pub mod engine;
pub mod executor;
pub mod router;

pub use compiler::{validate, CompiledGraph, Plan, Stage, StageStep};
pub use coordinator::Coordinator;
pub use engine::{EngineBuilder, ExecutionEngine, PlanTarget};
pub use executor::NodeExecutor;
