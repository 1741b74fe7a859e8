//! Run state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is currently executing
    Running,
    /// Every stage finished
    Completed,
    /// A step failed or the run was cancelled
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Output recorded for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub text: String,

    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl StepOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: empty_metadata(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// State of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: Uuid,

    pub pipeline_id: String,

    pub pipeline_name: String,

    /// Goal text the run was started with
    pub goal: String,

    pub status: RunStatus,

    /// Percentage 0-100
    pub progress: u8,

    /// Role of the step most recently started
    pub current_agent: Option<String>,

    /// Step outputs keyed by step id; entries are never overwritten
    pub outputs: BTreeMap<String, StepOutput>,

    pub total_nodes: usize,

    pub completed_nodes: usize,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
}

impl RunState {
    /// Create a running state
    pub fn new(
        pipeline_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        goal: impl Into<String>,
        total_nodes: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline_id.into(),
            pipeline_name: pipeline_name.into(),
            goal: goal.into(),
            status: RunStatus::Running,
            progress: 0,
            current_agent: None,
            outputs: BTreeMap::new(),
            total_nodes,
            completed_nodes: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Note the role of a step that just started
    pub fn mark_started(&mut self, role: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.current_agent = Some(role.to_string());
        true
    }

    /// Record a step output and advance progress
    ///
    /// Returns `false` when the run is already terminal or the step already
    /// has an output; nothing changes in that case.
    pub fn record_output(&mut self, step_id: &str, output: StepOutput) -> bool {
        if self.is_terminal() || self.outputs.contains_key(step_id) {
            return false;
        }
        self.outputs.insert(step_id.to_string(), output);
        self.completed_nodes += 1;
        self.progress = Self::percent(self.completed_nodes, self.total_nodes);
        true
    }

    /// Mark the run as completed
    pub fn complete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = RunStatus::Completed;
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Mark the run as failed
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn view(&self) -> RunStatusView {
        RunStatusView {
            run_id: self.id,
            pipeline_id: self.pipeline_id.clone(),
            status: self.status,
            progress: self.progress,
            current_agent: self.current_agent.clone(),
            completed_nodes: self.completed_nodes,
            total_nodes: self.total_nodes,
            started_at: self.started_at,
            error: self.error.clone(),
        }
    }

    pub fn result(&self) -> RunResult {
        RunResult {
            run_id: self.id,
            status: self.status,
            outputs: self.outputs.clone(),
            metadata: RunMetadata {
                pipeline_id: self.pipeline_id.clone(),
                pipeline_name: self.pipeline_name.clone(),
                goal: self.goal.clone(),
                completed_nodes: self.completed_nodes,
                total_nodes: self.total_nodes,
                started_at: self.started_at,
                finished_at: self.finished_at,
                error: self.error.clone(),
            },
        }
    }

    fn percent(done: usize, total: usize) -> u8 {
        if total == 0 {
            return 0;
        }
        ((100.0 * done as f64 / total as f64).round() as u64).min(100) as u8
    }
}

/// Lightweight status answer for polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub status: RunStatus,
    pub progress: u8,
    pub current_agent: Option<String>,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Final outputs of a terminal run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub outputs: BTreeMap<String, StepOutput>,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub goal: String,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
