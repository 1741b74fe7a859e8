//! Step handlers and the other external collaborators of the engine

pub mod config;
pub mod response;
pub mod retrieval;
pub mod subprocess;

use crate::core::{RunState, Step, StepOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub use config::HandlerConfig;
pub use response::HandlerError;
pub use retrieval::{NoopRetriever, RetrievalPlan, RetrievalRequest, Retriever};
pub use subprocess::CommandHandler;

/// Runs one step for a given role
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Produce the step output from the composed input
    async fn handle(
        &self,
        step: &Step,
        input: &str,
        context: &[String],
        state: &RunState,
    ) -> Result<StepOutput, HandlerError>;
}

/// Collapses parent texts for the `summary` fan-in mode
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, texts: &[String]) -> Result<String, HandlerError>;
}

/// Role -> handler lookup
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the role
    pub fn register(&mut self, role: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(role.into(), handler);
    }

    pub fn with_handler<H: StepHandler + 'static>(mut self, role: impl Into<String>, handler: H) -> Self {
        self.register(role, Arc::new(handler));
        self
    }

    pub fn get(&self, role: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(role).cloned()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.handlers.contains_key(role)
    }

    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<_> = self.handlers.keys().cloned().collect();
        roles.sort();
        roles
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}

/// Returns the composed input unchanged
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

#[async_trait]
impl StepHandler for EchoHandler {
    async fn handle(
        &self,
        step: &Step,
        input: &str,
        context: &[String],
        _state: &RunState,
    ) -> Result<StepOutput, HandlerError> {
        Ok(StepOutput::text(input).with_metadata(serde_json::json!({
            "role": step.role,
            "context_snippets": context.len(),
        })))
    }
}

/// Handler backed by an async closure over the step id and composed input
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure as a [`StepHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        step: &Step,
        input: &str,
        _context: &[String],
        _state: &RunState,
    ) -> Result<StepOutput, HandlerError> {
        (self.f)(step.id.clone(), input.to_string()).await
    }
}

/// Summarizer that hands the text back unchanged
#[derive(Debug, Clone, Default)]
pub struct PassthroughSummarizer;

#[async_trait]
impl Summarizer for PassthroughSummarizer {
    async fn summarize(&self, texts: &[String]) -> Result<String, HandlerError> {
        Ok(texts.join("\n"))
    }
}
