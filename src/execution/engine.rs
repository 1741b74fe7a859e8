//! Execution engine - the host-facing facade over compiler, coordinator and registry

use crate::core::config::EngineConfig;
use crate::core::{PipelineDefinition, RunResult, RunState, RunStatusView};
use crate::error::EngineError;
use crate::execution::compiler::{self, CompiledGraph, Plan};
use crate::execution::coordinator::Coordinator;
use crate::execution::executor::NodeExecutor;
use crate::handlers::{
    HandlerRegistry, NoopRetriever, PassthroughSummarizer, Retriever, StepHandler, Summarizer,
};
use crate::persistence::{InMemoryPersistence, PersistenceBackend, RunRecord};
use crate::registry::{RunEvent, RunEventEnvelope, RunRegistry, RunSubscription};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// What to compile for `plan`
#[derive(Debug, Clone, Copy)]
pub enum PlanTarget<'a> {
    Definition(&'a PipelineDefinition),
    /// A pipeline stored with `save_pipeline`
    Id(&'a str),
}

/// Builder for [`ExecutionEngine`]
pub struct EngineBuilder {
    handlers: HandlerRegistry,
    retriever: Arc<dyn Retriever>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn PersistenceBackend>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            retriever: Arc::new(NoopRetriever),
            summarizer: Arc::new(PassthroughSummarizer),
            store: Arc::new(InMemoryPersistence::new()),
            config: EngineConfig::default(),
        }
    }
}

impl EngineBuilder {
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handler<H: StepHandler + 'static>(mut self, role: impl Into<String>, handler: H) -> Self {
        self.handlers.register(role, Arc::new(handler));
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistenceBackend>) -> Self {
        self.store = store;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let registry = Arc::new(RunRegistry::new(self.store, &self.config));
        let executor = NodeExecutor::new(
            self.handlers,
            self.retriever,
            self.summarizer,
            self.config.summary_max_chars,
        );
        ExecutionEngine {
            coordinator: Coordinator::new(executor, Arc::clone(&registry)),
            registry,
            config: self.config,
        }
    }
}

/// Pipeline execution engine
#[derive(Clone)]
pub struct ExecutionEngine {
    coordinator: Coordinator,
    registry: Arc<RunRegistry>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with default collaborators and in-memory history
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self::builder().handlers(handlers).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Compile a pipeline into stages; never fails, problems come back as issues
    pub fn validate(&self, pipeline: &PipelineDefinition) -> Plan {
        compiler::validate(pipeline)
    }

    /// Like `validate`, but can resolve a stored pipeline first
    pub async fn plan(&self, target: PlanTarget<'_>) -> Result<Plan, EngineError> {
        match target {
            PlanTarget::Definition(pipeline) => Ok(self.validate(pipeline)),
            PlanTarget::Id(id) => Ok(self.validate(&self.load_pipeline(id).await?)),
        }
    }

    pub async fn save_pipeline(&self, pipeline: &PipelineDefinition) -> Result<(), EngineError> {
        self.registry.store().save_pipeline(pipeline).await?;
        info!("Saved pipeline {}", pipeline.id);
        Ok(())
    }

    pub async fn load_pipeline(&self, id: &str) -> Result<PipelineDefinition, EngineError> {
        self.registry
            .store()
            .load_pipeline(id)
            .await?
            .ok_or_else(|| EngineError::PipelineNotFound(id.to_string()))
    }

    pub async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>, EngineError> {
        Ok(self.registry.store().list_pipelines().await?)
    }

    /// Begin executing `pipeline` in the background; returns the new run id
    ///
    /// With strict validation a pipeline whose plan has issues is refused.
    pub async fn start(&self, pipeline: &PipelineDefinition, goal: &str) -> Result<Uuid, EngineError> {
        if self.registry.is_shut_down() {
            return Err(EngineError::Cancelled);
        }

        let graph = CompiledGraph::compile(pipeline);
        if !graph.issues().is_empty() {
            if self.config.strict_validation {
                return Err(EngineError::InvalidPipeline(graph.issues().to_vec()));
            }
            warn!(
                "Starting pipeline {} despite issues: {}",
                pipeline.id,
                graph.issues().join("; ")
            );
        }

        let state = RunState::new(&pipeline.id, &pipeline.name, goal, graph.node_count());
        let handle = self.registry.create(state).await;
        let run_id = handle.id();
        info!("Starting run {} of pipeline {}", run_id, pipeline.id);

        let coordinator = self.coordinator.clone();
        let graph = Arc::new(graph);
        tokio::spawn(async move {
            coordinator.run(graph, handle).await;
        });

        Ok(run_id)
    }

    /// Start a pipeline stored with `save_pipeline`
    pub async fn start_by_id(&self, pipeline_id: &str, goal: &str) -> Result<Uuid, EngineError> {
        let pipeline = self.load_pipeline(pipeline_id).await?;
        self.start(&pipeline, goal).await
    }

    pub async fn status(&self, run_id: Uuid) -> Result<RunStatusView, EngineError> {
        if let Some(handle) = self.registry.get(run_id).await {
            return Ok(handle.view().await);
        }
        Ok(self.persisted(run_id).await?.view())
    }

    /// Live event feed, starting with a status snapshot
    pub async fn stream(&self, run_id: Uuid) -> Result<RunSubscription, EngineError> {
        if let Some(handle) = self.registry.get(run_id).await {
            return Ok(handle.subscribe().await);
        }

        let record = self.persisted(run_id).await?;
        Ok(RunSubscription::closed(RunEventEnvelope {
            run_id,
            sequence: 0,
            timestamp: Utc::now(),
            event: RunEvent::Status {
                status: record.status,
                progress: record.progress,
                current_agent: record.current_agent,
            },
        }))
    }

    /// Outputs and metadata of a terminal run
    pub async fn result(&self, run_id: Uuid) -> Result<RunResult, EngineError> {
        if let Some(handle) = self.registry.get(run_id).await {
            let state = handle.snapshot().await;
            if !state.is_terminal() {
                return Err(EngineError::RunNotFinished(run_id));
            }
            return Ok(state.result());
        }
        Ok(self.persisted(run_id).await?.to_result())
    }

    /// Resolve once the run is terminal and its record is saved
    pub async fn wait(&self, run_id: Uuid) -> Result<RunResult, EngineError> {
        let mut events = self.stream(run_id).await?;
        while events.recv().await.is_some() {}
        if let Some(handle) = self.registry.get(run_id).await {
            handle.settled().await;
        }
        self.result(run_id).await
    }

    /// Cancel a run; returns `false` if it had already finished
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool, EngineError> {
        if let Some(handle) = self.registry.get(run_id).await {
            let cancelled = self.registry.cancel(&handle).await;
            if cancelled {
                info!("Run {} cancelled", run_id);
            }
            return Ok(cancelled);
        }
        self.persisted(run_id).await?;
        Ok(false)
    }

    pub async fn list_active(&self) -> Vec<RunStatusView> {
        self.registry.list_active().await
    }

    /// Finished runs, most recent first
    pub async fn list_history(&self, limit: usize) -> Result<Vec<RunRecord>, EngineError> {
        Ok(self.registry.store().list_runs(limit).await?)
    }

    /// Start the periodic sweep of expired runs
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.registry
            .spawn_reaper(Duration::from_secs(self.config.sweep_interval_secs))
    }

    /// Cancel running work and stop background maintenance
    pub async fn shutdown(&self) {
        info!("Shutting down execution engine");
        self.registry.shutdown().await;
    }

    async fn persisted(&self, run_id: Uuid) -> Result<RunRecord, EngineError> {
        self.registry
            .store()
            .load_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }
}
