//! Execution coordinator - drives compiled stages for one run

use crate::execution::compiler::CompiledGraph;
use crate::execution::executor::NodeExecutor;
use crate::execution::router::select_successors;
use crate::registry::{RunHandle, RunRegistry, CANCELLED_MESSAGE};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Runs the stages of a compiled graph, one stage at a time
///
/// Steps within a stage run as separate tasks. A step with incoming edges
/// runs only if at least one of those edges was taken by routing; the rest
/// are reported as skipped. The first failure fails the run; siblings still
/// in flight are detached and whatever they produce is discarded.
#[derive(Clone)]
pub struct Coordinator {
    executor: NodeExecutor,
    registry: Arc<RunRegistry>,
}

enum StageOutcome {
    Finished,
    Aborted,
}

impl Coordinator {
    pub fn new(executor: NodeExecutor, registry: Arc<RunRegistry>) -> Self {
        Self { executor, registry }
    }

    /// Drive the run to a terminal state
    pub async fn run(&self, graph: Arc<CompiledGraph>, handle: Arc<RunHandle>) {
        info!(
            "Run {} started: {} steps in {} stages",
            handle.id(),
            graph.node_count(),
            graph.stages().len()
        );

        // (from, to) pairs that routing kept live
        let mut live: HashSet<(String, String)> = HashSet::new();

        for stage in graph.stages() {
            if handle.cancel_token().is_cancelled() || handle.is_terminal().await {
                debug!("Run {} stopped before stage {}", handle.id(), stage.index);
                // No-op if the run already ended; covers runs cancelled before they started
                self.registry.fail(&handle, CANCELLED_MESSAGE).await;
                return;
            }
            info!(
                "Run {} stage {}: {}",
                handle.id(),
                stage.index,
                stage
                    .steps
                    .iter()
                    .map(|s| s.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            match self.run_stage(&graph, &handle, stage.index, &mut live).await {
                StageOutcome::Finished => {}
                StageOutcome::Aborted => return,
            }
        }

        self.registry.complete(&handle).await;
    }

    async fn run_stage(
        &self,
        graph: &Arc<CompiledGraph>,
        handle: &Arc<RunHandle>,
        index: usize,
        live: &mut HashSet<(String, String)>,
    ) -> StageOutcome {
        let Some(stage) = graph.stages().get(index) else {
            return StageOutcome::Finished;
        };

        let mut tasks = JoinSet::new();
        for summary in &stage.steps {
            let Some(step) = graph.step(&summary.id) else {
                continue;
            };
            let parents = graph.parents(&step.id);
            let live_parents: Vec<String> = parents
                .iter()
                .filter(|p| live.contains(&((*p).clone(), step.id.clone())))
                .cloned()
                .collect();

            if !parents.is_empty() && live_parents.is_empty() {
                info!("Skipping step {}: no live incoming edge", step.id);
                handle.node_skipped(&step.id, &step.role).await;
                continue;
            }

            let executor = self.executor.clone();
            let handle = Arc::clone(handle);
            let step = step.clone();
            tasks.spawn(async move {
                let result = executor.execute(&handle, &step, &live_parents).await;
                (step, result)
            });
        }

        let cancel = handle.cancel_token();
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Run {} cancelled, detaching {} steps", handle.id(), tasks.len());
                    tasks.detach_all();
                    self.registry.fail(handle, CANCELLED_MESSAGE).await;
                    return StageOutcome::Aborted;
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => return StageOutcome::Finished,
                Some(Ok((step, Ok(Some(output))))) => {
                    let state = handle.snapshot().await;
                    for child in select_successors(&step, graph.children(&step.id), &state, &output) {
                        live.insert((step.id.clone(), child));
                    }
                }
                Some(Ok((step, Ok(None)))) => {
                    debug!("Output of step {} discarded", step.id);
                }
                Some(Ok((step, Err(e)))) => {
                    error!("Run {} aborted at step {}: {}", handle.id(), step.id, e);
                    self.registry.fail(handle, &e.to_string()).await;
                    tasks.detach_all();
                    return StageOutcome::Aborted;
                }
                Some(Err(e)) => {
                    error!("Run {} step task failed: {}", handle.id(), e);
                    self.registry
                        .fail(handle, &format!("step task failed: {}", e))
                        .await;
                    tasks.detach_all();
                    return StageOutcome::Aborted;
                }
            }
        }
    }
}
