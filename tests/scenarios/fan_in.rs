//! Diamond graphs and the fan-in modes

use crate::helpers::*;
use storyflow::{EchoHandler, ExecutionEngine, InputsMode, PipelineDefinition, RunStatus, Step};

fn diamond(join: Step) -> PipelineDefinition {
    PipelineDefinition::new("diamond", "Diamond")
        .with_step(Step::new("A", "root"))
        .with_step(Step::new("B", "left"))
        .with_step(Step::new("C", "right"))
        .with_step(join)
        .with_edge("A", "B")
        .with_edge("A", "C")
        .with_edge("B", "D")
        .with_edge("C", "D")
}

#[tokio::test]
async fn test_diamond_concat_keeps_edge_order() {
    let engine = ExecutionEngine::builder()
        .handler("root", fixed("seed"))
        .handler("left", fixed("left side"))
        .handler("right", fixed("right side"))
        .handler("join", EchoHandler)
        .build();
    let pipeline = diamond(Step::new("D", "join"));

    assert_eq!(
        engine.validate(&pipeline).stage_ids(),
        vec![
            vec!["A".to_string()],
            vec!["B".to_string(), "C".to_string()],
            vec!["D".to_string()]
        ]
    );

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outputs["D"].text, "g\n\nleft side\nright side");
    assert_eq!(result.metadata.completed_nodes, 4);
}

#[tokio::test]
async fn test_merge_combines_json_objects() {
    let engine = ExecutionEngine::builder()
        .handler("root", fixed("{}"))
        .handler("left", fixed(r#"{"hero":"fox","mood":"calm"}"#))
        .handler("right", fixed(r#"{"mood":"tense"}"#))
        .handler("join", EchoHandler)
        .build();
    let pipeline = diamond(Step::new("D", "join").with_inputs_mode(InputsMode::Merge));

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    let text = &result.outputs["D"].text;
    let merged = text.strip_prefix("g\n\n").unwrap();
    let value: serde_json::Value = serde_json::from_str(merged).unwrap();
    assert_eq!(value["hero"], "fox");
    assert_eq!(value["mood"], "tense");
}

#[tokio::test]
async fn test_merge_falls_back_for_prose() {
    let engine = ExecutionEngine::builder()
        .handler("root", fixed("seed"))
        .handler("left", fixed(r#"{"hero":"fox"}"#))
        .handler("right", fixed("plain prose"))
        .handler("join", EchoHandler)
        .build();
    let pipeline = diamond(Step::new("D", "join").with_inputs_mode(InputsMode::Merge));

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.outputs["D"].text, "g\n\n{\"hero\":\"fox\"}\nplain prose");
}

#[tokio::test]
async fn test_first_and_last_skip_empty_parents() {
    let engine = ExecutionEngine::builder()
        .handler("root", fixed("seed"))
        .handler("left", fixed(""))
        .handler("right", fixed("right side"))
        .handler("join", EchoHandler)
        .build();

    let first = diamond(Step::new("D", "join").with_inputs_mode(InputsMode::First));
    let run_id = engine.start(&first, "g").await.unwrap();
    assert_eq!(engine.wait(run_id).await.unwrap().outputs["D"].text, "g\n\nright side");

    let last = diamond(Step::new("D", "join").with_inputs_mode(InputsMode::Last));
    let run_id = engine.start(&last, "g").await.unwrap();
    assert_eq!(engine.wait(run_id).await.unwrap().outputs["D"].text, "g\n\nright side");
}

#[tokio::test]
async fn test_summary_mode_uses_summarizer() {
    use async_trait::async_trait;
    use std::sync::Arc;
    use storyflow::{HandlerError, Summarizer};

    struct Counting;

    #[async_trait]
    impl Summarizer for Counting {
        async fn summarize(&self, texts: &[String]) -> Result<String, HandlerError> {
            Ok(format!("{} chunk(s), {} chars", texts.len(), texts[0].chars().count()))
        }
    }

    let engine = ExecutionEngine::builder()
        .handler("root", fixed("seed"))
        .handler("left", fixed("abcdef"))
        .handler("right", fixed("ghijkl"))
        .handler("join", EchoHandler)
        .summarizer(Arc::new(Counting))
        .config(storyflow::EngineConfig {
            summary_max_chars: 10,
            ..Default::default()
        })
        .build();
    let pipeline = diamond(Step::new("D", "join").with_inputs_mode(InputsMode::Summary));

    let run_id = engine.start(&pipeline, "g").await.unwrap();
    let result = engine.wait(run_id).await.unwrap();

    assert_eq!(result.outputs["D"].text, "g\n\n1 chunk(s), 10 chars");
}
