//! Step failures, configuration defects and validation refusals

use crate::helpers::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storyflow::{
    EchoHandler, EngineConfig, EngineError, ExecutionEngine, PipelineDefinition, PlanTarget,
    RunEvent, RunStatus, Step,
};
use tokio::sync::Notify;

fn chain() -> PipelineDefinition {
    PipelineDefinition::new("chain", "Chain")
        .with_step(Step::new("outline", "planner"))
        .with_step(Step::new("draft", "writer"))
        .with_step(Step::new("edit", "editor"))
        .with_edge("outline", "draft")
        .with_edge("draft", "edit")
}

#[tokio::test]
async fn test_failed_step_fails_the_run() {
    let gate = Arc::new(Notify::new());
    let engine = ExecutionEngine::builder()
        .handler("planner", gated(gate.clone()))
        .handler("writer", failing("rate limited"))
        .handler("editor", EchoHandler)
        .build();

    let run_id = engine.start(&chain(), "g").await.unwrap();
    let subscription = engine.stream(run_id).await.unwrap();
    gate.notify_one();
    let events = drain(subscription).await;

    let kinds = kinds(&events);
    assert_eq!(kinds[kinds.len() - 4..], ["node_complete", "node_start", "node_error", "error"]);
    assert!(!events.iter().any(|e| matches!(&e.event, RunEvent::NodeStart { step_id, .. } if step_id == "edit")));
    match &events[events.len() - 2].event {
        RunEvent::NodeError { step_id, role, message } => {
            assert_eq!(step_id, "draft");
            assert_eq!(role, "writer");
            assert!(message.contains("rate limited"));
        }
        other => panic!("expected node_error, got {:?}", other),
    }

    let result = engine.result(run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(
        result.metadata.error.as_deref(),
        Some("step 'draft' failed: handler failed: rate limited")
    );
    assert!(result.outputs.contains_key("outline"));
    assert!(!result.outputs.contains_key("edit"));
}

#[tokio::test]
async fn test_unknown_role_is_a_config_error() {
    let engine = ExecutionEngine::builder().handler("planner", EchoHandler).build();
    let pipeline = PipelineDefinition::new("ghost", "Ghost").with_step(Step::new("haunt", "ghost"));

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.metadata.error.unwrap_or_default();
    assert!(error.starts_with("configuration error"), "{}", error);
    assert!(error.contains("ghost"));
}

#[tokio::test]
async fn test_late_sibling_result_is_discarded() {
    let finished = Arc::new(AtomicUsize::new(0));
    let engine = ExecutionEngine::builder()
        .handler("planner", EchoHandler)
        .handler("writer", failing("boom"))
        .handler("slow", slow(Duration::from_millis(150), finished.clone()))
        .build();
    let pipeline = PipelineDefinition::new("split", "Split")
        .with_step(Step::new("outline", "planner"))
        .with_step(Step::new("draft", "writer"))
        .with_step(Step::new("research", "slow"))
        .with_edge("outline", "draft")
        .with_edge("outline", "research");

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);

    // Let the detached sibling finish
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let result = engine.result(run_id).await.unwrap();
    assert!(!result.outputs.contains_key("research"));
    assert_eq!(result.metadata.completed_nodes, 1);
}

#[tokio::test]
async fn test_cycle_refused_under_strict_validation() {
    let engine = ExecutionEngine::builder().handler("writer", EchoHandler).build();
    let pipeline = PipelineDefinition::new("loop", "Loop")
        .with_step(Step::new("a", "writer"))
        .with_step(Step::new("b", "writer"))
        .with_edge("a", "b")
        .with_edge("b", "a");

    let plan = engine.plan(PlanTarget::Definition(&pipeline)).await.unwrap();
    assert!(plan.stages.is_empty());
    assert_eq!(plan.issues.len(), 1);
    assert!(plan.issues[0].starts_with("Cycle detected"));

    match engine.start(&pipeline, "g").await {
        Err(EngineError::InvalidPipeline(issues)) => assert_eq!(issues, plan.issues),
        other => panic!("expected InvalidPipeline, got {:?}", other),
    }
    assert!(engine.list_active().await.is_empty());
}

#[tokio::test]
async fn test_lenient_start_runs_valid_part() {
    let engine = ExecutionEngine::builder()
        .handler("writer", EchoHandler)
        .config(EngineConfig {
            strict_validation: false,
            ..EngineConfig::default()
        })
        .build();
    let pipeline = PipelineDefinition::new("partial", "Partial")
        .with_step(Step::new("a", "writer"))
        .with_step(Step::new("b", "writer"))
        .with_edge("a", "b")
        .with_edge("b", "missing");

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outputs["b"].text, "g\n\ng");
}

#[tokio::test]
async fn test_unknown_ids() {
    let engine = ExecutionEngine::builder().build();
    let run_id = uuid::Uuid::new_v4();

    assert!(matches!(engine.status(run_id).await, Err(EngineError::RunNotFound(id)) if id == run_id));
    assert!(matches!(engine.cancel(run_id).await, Err(EngineError::RunNotFound(_))));
    assert!(matches!(
        engine.plan(PlanTarget::Id("nope")).await,
        Err(EngineError::PipelineNotFound(ref id)) if id == "nope"
    ));
}
