//! Node executor - runs a single step against the run state

use crate::core::{Step, StepOutput};
use crate::error::EngineError;
use crate::execution::aggregator::aggregate;
use crate::handlers::{
    HandlerError, HandlerRegistry, RetrievalPlan, RetrievalRequest, Retriever, StepHandler, Summarizer,
};
use crate::registry::RunHandle;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs one step: aggregate, retrieve, compose, handle, record
#[derive(Clone)]
pub struct NodeExecutor {
    handlers: HandlerRegistry,
    retriever: Arc<dyn Retriever>,
    summarizer: Arc<dyn Summarizer>,
    summary_max_chars: usize,
}

impl NodeExecutor {
    pub fn new(
        handlers: HandlerRegistry,
        retriever: Arc<dyn Retriever>,
        summarizer: Arc<dyn Summarizer>,
        summary_max_chars: usize,
    ) -> Self {
        Self {
            handlers,
            retriever,
            summarizer,
            summary_max_chars,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Execute `step` with the outputs of `parents` (in edge declaration order)
    ///
    /// Returns `Ok(None)` when the run ended before the output could be
    /// recorded; the output is discarded in that case.
    pub async fn execute(
        &self,
        run: &RunHandle,
        step: &Step,
        parents: &[String],
    ) -> Result<Option<StepOutput>, EngineError> {
        if !run.node_started(&step.id, &step.role).await {
            debug!("Run {} already ended, not starting step {}", run.id(), step.id);
            return Ok(None);
        }
        info!("Executing step: {} ({})", step.id, step.role);

        let Some(handler) = self.handlers.get(&step.role) else {
            let message = format!("no handler registered for role '{}'", step.role);
            error!("Step {}: {}", step.id, message);
            run.node_failed(&step.id, &step.role, &message).await;
            return Err(EngineError::Config(message));
        };

        let output = match self.produce(run, step, parents, handler.as_ref()).await {
            Ok(output) => output,
            Err(e) => {
                error!("Step {} failed: {}", step.id, e);
                let message = e.to_string();
                run.node_failed(&step.id, &step.role, &message).await;
                return Err(EngineError::execution(&step.id, message));
            }
        };

        if !run.node_completed(&step.id, &step.role, output.clone()).await {
            debug!("Run {} ended while step {} was running", run.id(), step.id);
            return Ok(None);
        }
        info!("Step {} completed", step.id);
        Ok(Some(output))
    }

    async fn produce(
        &self,
        run: &RunHandle,
        step: &Step,
        parents: &[String],
        handler: &dyn StepHandler,
    ) -> Result<StepOutput, HandlerError> {
        let state = run.snapshot().await;

        let parent_outputs: Vec<Option<&StepOutput>> =
            parents.iter().map(|id| state.outputs.get(id)).collect();
        let merged = aggregate(
            step.inputs_mode,
            &parent_outputs,
            self.summarizer.as_ref(),
            self.summary_max_chars,
        )
        .await?;

        let plan = RetrievalPlan::from_config(step.retrieval.as_ref());
        let context = self
            .retriever
            .retrieve(RetrievalRequest {
                step_id: &step.id,
                role: &step.role,
                goal: &state.goal,
                merged_input: &merged,
                plan: &plan,
                state: &state,
            })
            .await?;
        debug!("Step {} retrieved {} context snippets", step.id, context.len());

        let input = compose_input(&state.goal, &merged, &context);
        handler.handle(step, &input, &context, &state).await
    }
}

/// Goal, aggregated input and retrieved context, skipping empty segments
pub fn compose_input(goal: &str, merged: &str, context: &[String]) -> String {
    let context: Vec<&str> = context
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let context = context.join("\n");

    [goal.trim(), merged.trim(), context.as_str()]
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
