//! Cancelling runs and shutting the engine down

use crate::helpers::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storyflow::registry::CANCELLED_MESSAGE;
use storyflow::{EngineError, ExecutionEngine, PipelineDefinition, RunEvent, RunStatus, Step};

fn slow_engine(finished: Arc<AtomicUsize>) -> ExecutionEngine {
    ExecutionEngine::builder()
        .handler("slow", slow(Duration::from_millis(200), finished))
        .build()
}

fn slow_chain() -> PipelineDefinition {
    PipelineDefinition::new("slow", "Slow")
        .with_step(Step::new("first", "slow"))
        .with_step(Step::new("second", "slow"))
        .with_edge("first", "second")
}

#[tokio::test]
async fn test_cancel_fails_run_and_discards_late_output() {
    let finished = Arc::new(AtomicUsize::new(0));
    let engine = slow_engine(finished.clone());

    let run_id = engine.start(&slow_chain(), "g").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.cancel(run_id).await.unwrap());

    let result = engine.wait(run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.metadata.error.as_deref(), Some(CANCELLED_MESSAGE));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let result = engine.result(run_id).await.unwrap();
    assert!(result.outputs.is_empty());
    assert_eq!(result.metadata.completed_nodes, 0);
}

#[tokio::test]
async fn test_cancel_is_reported_once() {
    let engine = slow_engine(Arc::new(AtomicUsize::new(0)));

    let run_id = engine.start(&slow_chain(), "g").await.unwrap();
    let subscription = engine.stream(run_id).await.unwrap();
    assert!(engine.cancel(run_id).await.unwrap());
    assert!(!engine.cancel(run_id).await.unwrap());

    let events = drain(subscription).await;
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            RunEvent::Error { message } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![CANCELLED_MESSAGE]);
    assert!(events.last().map(|e| e.event.is_terminal()).unwrap_or(false));
}

#[tokio::test]
async fn test_cancel_after_completion_is_a_no_op() {
    let engine = ExecutionEngine::builder().handler("echo", storyflow::EchoHandler).build();
    let pipeline = PipelineDefinition::new("one", "One").with_step(Step::new("only", "echo"));

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    engine.wait(run_id).await.unwrap();

    assert!(!engine.cancel(run_id).await.unwrap());
    assert_eq!(engine.status(run_id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_cancels_active_runs() {
    let engine = slow_engine(Arc::new(AtomicUsize::new(0)));

    let run_id = engine.start(&slow_chain(), "g").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;

    let result = engine.wait(run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.metadata.error.as_deref(), Some(CANCELLED_MESSAGE));

    assert!(matches!(
        engine.start(&slow_chain(), "g").await,
        Err(EngineError::Cancelled)
    ));
}
