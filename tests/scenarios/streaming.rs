//! Event streams: snapshots, fan-out to many subscribers, late joiners

use crate::helpers::*;
use futures::StreamExt;
use std::sync::Arc;
use storyflow::{
    EchoHandler, EngineConfig, ExecutionEngine, PipelineDefinition, RunEvent, RunStatus, Step,
};
use tokio::sync::Notify;

fn pair() -> PipelineDefinition {
    PipelineDefinition::new("pair", "Pair")
        .with_step(Step::new("a", "gate"))
        .with_step(Step::new("b", "echo"))
        .with_edge("a", "b")
}

#[tokio::test]
async fn test_subscribers_see_the_same_events() {
    let gate = Arc::new(Notify::new());
    let engine = ExecutionEngine::builder()
        .handler("gate", gated(gate.clone()))
        .handler("echo", EchoHandler)
        .build();

    let run_id = engine.start(&pair(), "g").await.unwrap();
    let first = engine.stream(run_id).await.unwrap();
    let second = engine.stream(run_id).await.unwrap();
    gate.notify_one();

    let (first, second) = tokio::join!(drain(first), drain(second));
    // Snapshots are taken separately, everything after is the same broadcast
    assert_eq!(first[0].sequence, second[0].sequence);
    assert_eq!(first[1..], second[1..]);
    assert_contiguous(&first);
    assert!(first.last().map(|e| e.event.is_terminal()).unwrap_or(false));
}

#[tokio::test]
async fn test_late_subscriber_gets_terminal_snapshot() {
    let engine = ExecutionEngine::builder()
        .handler("gate", EchoHandler)
        .handler("echo", EchoHandler)
        .build();

    let run_id = engine.start(&pair(), "g").await.unwrap();
    engine.wait(run_id).await.unwrap();

    let events = collect_events(&engine, run_id).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].sequence > 0);
    match &events[0].event {
        RunEvent::Status {
            status,
            progress,
            current_agent,
        } => {
            assert_eq!(*status, RunStatus::Completed);
            assert_eq!(*progress, 100);
            assert_eq!(current_agent.as_deref(), Some("echo"));
        }
        other => panic!("expected status snapshot, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_after_eviction_uses_history() {
    let engine = ExecutionEngine::builder()
        .handler("gate", EchoHandler)
        .handler("echo", EchoHandler)
        .config(EngineConfig {
            retention_secs: 0,
            ..EngineConfig::default()
        })
        .build();

    let run_id = engine.start(&pair(), "g").await.unwrap();
    engine.wait(run_id).await.unwrap();
    assert_eq!(engine.registry().sweep().await, 1);
    assert!(engine.registry().get(run_id).await.is_none());

    let events: Vec<_> = engine.stream(run_id).await.unwrap().into_stream().collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0].event,
        RunEvent::Status {
            status: RunStatus::Completed,
            progress: 100,
            ..
        }
    ));
    assert_eq!(engine.result(run_id).await.unwrap().outputs["b"].text, "g\n\ng");
}

#[tokio::test]
async fn test_envelope_wire_format() {
    let engine = ExecutionEngine::builder()
        .handler("gate", EchoHandler)
        .handler("echo", EchoHandler)
        .build();
    let run_id = engine.start(&pair(), "g").await.unwrap();
    engine.wait(run_id).await.unwrap();

    let events = collect_events(&engine, run_id).await;
    let json = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(json["type"], "status");
    assert_eq!(json["run_id"], run_id.to_string());
    assert_eq!(json["status"], "completed");
    assert!(json["sequence"].is_u64());
    assert!(json["timestamp"].is_string());
}
