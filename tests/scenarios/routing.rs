//! Conditional routing through step predicates

use crate::helpers::*;
use std::sync::Arc;
use storyflow::{EchoHandler, ExecutionEngine, PipelineDefinition, RunEvent, RunStatus, Step};
use tokio::sync::Notify;

fn review_pipeline(predicate: &str) -> PipelineDefinition {
    PipelineDefinition::new("review", "Review")
        .with_step(Step::new("review", "reviewer").with_predicate(predicate))
        .with_step(Step::new("publish", "writer"))
        .with_step(Step::new("revise", "writer"))
        .with_step(Step::new("polish", "writer"))
        .with_edge("review", "publish")
        .with_edge("review", "revise")
        .with_edge("revise", "polish")
}

#[tokio::test]
async fn test_true_predicate_takes_first_edge() {
    let engine = ExecutionEngine::builder()
        .handler("reviewer", fixed("Looks good. APPROVED"))
        .handler("writer", EchoHandler)
        .build();
    let pipeline = review_pipeline("output.text contains 'APPROVED'");

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.outputs.contains_key("publish"));
    assert!(!result.outputs.contains_key("revise"));
    assert!(!result.outputs.contains_key("polish"));
    assert_eq!(result.metadata.completed_nodes, 2);
    assert_eq!(result.metadata.total_nodes, 4);
    assert_eq!(engine.status(run_id).await.unwrap().progress, 100);
}

#[tokio::test]
async fn test_false_predicate_takes_second_edge() {
    let engine = ExecutionEngine::builder()
        .handler("reviewer", fixed("Needs work"))
        .handler("writer", EchoHandler)
        .build();
    let pipeline = review_pipeline("output.text contains 'APPROVED'");

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.outputs.contains_key("publish"));
    assert_eq!(result.outputs["revise"].text, "g\n\nNeeds work");
    assert!(result.outputs.contains_key("polish"));
    assert_eq!(result.metadata.completed_nodes, 3);
}

#[tokio::test]
async fn test_broken_predicate_counts_as_false() {
    let engine = ExecutionEngine::builder()
        .handler("reviewer", fixed("APPROVED"))
        .handler("writer", EchoHandler)
        .build();
    let pipeline = review_pipeline("output.text contains (");

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.outputs.contains_key("publish"));
    assert!(result.outputs.contains_key("revise"));
}

#[tokio::test]
async fn test_predicate_sees_run_state() {
    let engine = ExecutionEngine::builder()
        .handler("reviewer", fixed("draft"))
        .handler("writer", EchoHandler)
        .build();
    let pipeline = review_pipeline("goal startsWith 'publish' && completedNodes == 1");

    let run_id = engine.start(&pipeline, "publish now").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert!(result.outputs.contains_key("publish"));
    assert!(!result.outputs.contains_key("revise"));
}

#[tokio::test]
async fn test_untaken_branch_reports_skips() {
    let gate = Arc::new(Notify::new());
    let engine = ExecutionEngine::builder()
        .handler("reviewer", gated(gate.clone()))
        .handler("writer", EchoHandler)
        .build();
    let pipeline = review_pipeline("goal contains 'ship'");

    let run_id = engine.start(&pipeline, "ship it").await.unwrap();
    let subscription = engine.stream(run_id).await.unwrap();
    gate.notify_one();
    let events = drain(subscription).await;

    assert_contiguous(&events);
    let skipped: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            RunEvent::NodeSkipped { step_id, role } => Some((step_id.as_str(), role.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![("revise", "writer"), ("polish", "writer")]);

    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            RunEvent::NodeComplete { step_id, .. } => Some(step_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["review", "publish"]);
    assert!(matches!(
        events.last().map(|e| &e.event),
        Some(RunEvent::Completed { progress: 100 })
    ));
}
