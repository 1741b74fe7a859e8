//! Retrieval settings reaching the retriever and context reaching handlers

use crate::helpers::*;
use std::sync::Arc;
use storyflow::core::RetrievalConfig;
use storyflow::{EchoHandler, ExecutionEngine, PipelineDefinition, RunStatus, Step};

#[tokio::test]
async fn test_weights_are_normalized_before_retrieval() {
    let retriever = Arc::new(RecordingRetriever::with_snippets(&["The fox is red.", "  ", "It lives in a den."]));
    let engine = ExecutionEngine::builder()
        .handler("writer", EchoHandler)
        .retriever(retriever.clone())
        .build();
    let pipeline = PipelineDefinition::new("lore", "Lore")
        .with_step(Step::new("outline", "writer").with_retrieval(RetrievalConfig {
            graph_weight: Some(2.0),
            vector_weight: Some(2.0),
            categories: vec!["characters".into()],
            max_hops: Some(2),
        }))
        .with_step(Step::new("draft", "writer").with_retrieval(RetrievalConfig {
            graph_weight: Some(0.0),
            vector_weight: Some(0.0),
            ..Default::default()
        }))
        .with_edge("outline", "draft");

    let run_id = engine.start(&pipeline, "a fox").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    let calls = retriever.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].step_id, "outline");
    assert_eq!((calls[0].graph_weight, calls[0].vector_weight), (0.5, 0.5));
    assert_eq!(calls[0].categories, vec!["characters".to_string()]);
    assert_eq!(calls[0].merged_input, "");

    assert_eq!(calls[1].step_id, "draft");
    assert_eq!((calls[1].graph_weight, calls[1].vector_weight), (0.5, 0.5));
    assert_eq!(calls[1].merged_input, result.outputs["outline"].text);

    assert_eq!(
        result.outputs["outline"].text,
        "a fox\n\nThe fox is red.\nIt lives in a den."
    );
    assert_eq!(result.outputs["outline"].metadata["context_snippets"], 3);
}

#[tokio::test]
async fn test_one_sided_weight() {
    let retriever = Arc::new(RecordingRetriever::default());
    let engine = ExecutionEngine::builder()
        .handler("writer", EchoHandler)
        .retriever(retriever.clone())
        .build();
    let pipeline = PipelineDefinition::new("graph", "Graph").with_step(
        Step::new("only", "writer").with_retrieval(RetrievalConfig {
            vector_weight: Some(0.7),
            ..Default::default()
        }),
    );

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    engine.wait(run_id).await.unwrap();

    let calls = retriever.calls();
    assert_eq!((calls[0].graph_weight, calls[0].vector_weight), (0.0, 1.0));
}
