//! Shared fixtures for scenario tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storyflow::handlers::{RetrievalRequest, Retriever};
use storyflow::{
    handler_fn, ExecutionEngine, HandlerError, RunEventEnvelope, RunSubscription, StepHandler,
    StepOutput,
};
use tokio::sync::Notify;
use uuid::Uuid;

/// Wraps the composed input as `step<input>`
pub fn tagging() -> impl StepHandler {
    handler_fn(|id, input| async move {
        Ok::<_, HandlerError>(StepOutput::text(format!("{}<{}>", id, input)))
    })
}

/// Always returns `text`
pub fn fixed(text: &'static str) -> impl StepHandler {
    handler_fn(move |_id, _input| async move { Ok::<_, HandlerError>(StepOutput::text(text)) })
}

/// Always fails with `message`
pub fn failing(message: &'static str) -> impl StepHandler {
    handler_fn(move |_id, _input| async move {
        Err::<StepOutput, _>(HandlerError::Failed(message.to_string()))
    })
}

/// Echoes its input once `gate` is notified
pub fn gated(gate: Arc<Notify>) -> impl StepHandler {
    handler_fn(move |_id, input| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok::<_, HandlerError>(StepOutput::text(input))
        }
    })
}

/// Echoes its input after `delay`, counting how many calls finished
pub fn slow(delay: Duration, finished: Arc<AtomicUsize>) -> impl StepHandler {
    handler_fn(move |_id, input| {
        let finished = Arc::clone(&finished);
        async move {
            tokio::time::sleep(delay).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HandlerError>(StepOutput::text(input))
        }
    })
}

/// One retrieval call as seen by [`RecordingRetriever`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCall {
    pub step_id: String,
    pub graph_weight: f64,
    pub vector_weight: f64,
    pub categories: Vec<String>,
    pub merged_input: String,
}

/// Retriever that records every request and answers with fixed snippets
#[derive(Default)]
pub struct RecordingRetriever {
    snippets: Vec<String>,
    calls: Mutex<Vec<RetrievalCall>>,
}

impl RecordingRetriever {
    pub fn with_snippets(snippets: &[&str]) -> Self {
        Self {
            snippets: snippets.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RetrievalCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Retriever for RecordingRetriever {
    async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<Vec<String>, HandlerError> {
        let call = RetrievalCall {
            step_id: request.step_id.to_string(),
            graph_weight: request.plan.graph_weight,
            vector_weight: request.plan.vector_weight,
            categories: request.plan.categories.clone(),
            merged_input: request.merged_input.to_string(),
        };
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(self.snippets.clone())
    }
}

/// Every event left on a subscription, snapshot first
pub async fn drain(mut subscription: RunSubscription) -> Vec<RunEventEnvelope> {
    let mut events = Vec::new();
    while let Some(event) = subscription.recv().await {
        events.push(event);
    }
    events
}

/// Subscribe and drain, giving up after five seconds
pub async fn collect_events(engine: &ExecutionEngine, run_id: Uuid) -> Vec<RunEventEnvelope> {
    let subscription = engine.stream(run_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), drain(subscription))
        .await
        .expect("run did not finish in time")
}

pub fn kinds(events: &[RunEventEnvelope]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.kind()).collect()
}

/// Sequence numbers must grow by one from the snapshot on
pub fn assert_contiguous(events: &[RunEventEnvelope]) {
    for pair in events.windows(2) {
        assert_eq!(
            pair[1].sequence,
            pair[0].sequence + 1,
            "gap between {:?} and {:?}",
            pair[0].event,
            pair[1].event
        );
    }
}
