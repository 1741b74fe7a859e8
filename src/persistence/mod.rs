//! Persistence layer for run history and stored pipelines

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{PipelineDefinition, RunResult, RunState, RunStatus, RunStatusView, StepOutput};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persisted record of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run ID
    pub run_id: Uuid,

    pub pipeline_id: String,

    pub pipeline_name: String,

    pub goal: String,

    pub status: RunStatus,

    /// Progress (0 to 100)
    pub progress: u8,

    pub current_agent: Option<String>,

    pub completed_nodes: usize,

    pub total_nodes: usize,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    pub error: Option<String>,

    /// Outputs recorded before the run ended
    pub outputs: BTreeMap<String, StepOutput>,
}

impl From<&RunState> for RunRecord {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.id,
            pipeline_id: state.pipeline_id.clone(),
            pipeline_name: state.pipeline_name.clone(),
            goal: state.goal.clone(),
            status: state.status,
            progress: state.progress,
            current_agent: state.current_agent.clone(),
            completed_nodes: state.completed_nodes,
            total_nodes: state.total_nodes,
            started_at: state.started_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
            outputs: state.outputs.clone(),
        }
    }
}

impl RunRecord {
    /// Rebuild the run state this record was taken from
    pub fn to_state(&self) -> RunState {
        RunState {
            id: self.run_id,
            pipeline_id: self.pipeline_id.clone(),
            pipeline_name: self.pipeline_name.clone(),
            goal: self.goal.clone(),
            status: self.status,
            progress: self.progress,
            current_agent: self.current_agent.clone(),
            outputs: self.outputs.clone(),
            total_nodes: self.total_nodes,
            completed_nodes: self.completed_nodes,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }

    pub fn to_result(&self) -> RunResult {
        self.to_state().result()
    }

    pub fn view(&self) -> RunStatusView {
        self.to_state().view()
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run record, replacing any earlier record with the same ID
    async fn save_run(&self, record: &RunRecord) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// Most recent runs first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;

    /// All runs of one pipeline, most recent first
    async fn list_pipeline_runs(&self, pipeline_id: &str) -> Result<Vec<RunRecord>>;

    /// Store a pipeline definition under its ID
    async fn save_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()>;

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineDefinition>>;

    /// All stored pipelines, ordered by ID
    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    pipelines: RwLock<HashMap<String, PipelineDefinition>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(records: &mut [RunRecord]) {
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        self.runs.write().await.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut records: Vec<_> = self.runs.read().await.values().cloned().collect();
        newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn list_pipeline_runs(&self, pipeline_id: &str) -> Result<Vec<RunRecord>> {
        let mut records: Vec<_> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn save_pipeline(&self, pipeline: &PipelineDefinition) -> Result<()> {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id.clone(), pipeline.clone());
        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineDefinition>> {
        Ok(self.pipelines.read().await.get(pipeline_id).cloned())
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>> {
        let mut pipelines: Vec<_> = self.pipelines.read().await.values().cloned().collect();
        pipelines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pipelines)
    }
}
