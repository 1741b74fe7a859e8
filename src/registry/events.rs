//! Run lifecycle events and subscriptions

use crate::core::{RunStatus, StepOutput};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle event published by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Snapshot handed to every new subscriber
    Status {
        status: RunStatus,
        progress: u8,
        current_agent: Option<String>,
    },
    NodeStart {
        step_id: String,
        role: String,
    },
    NodeComplete {
        step_id: String,
        role: String,
        progress: u8,
        output: StepOutput,
    },
    NodeError {
        step_id: String,
        role: String,
        message: String,
    },
    /// A step none of whose incoming edges stayed live
    NodeSkipped {
        step_id: String,
        role: String,
    },
    Completed {
        progress: u8,
    },
    Error {
        message: String,
    },
}

impl RunEvent {
    /// `Completed` and `Error` end a run's event sequence
    pub fn is_terminal(&self) -> bool {
        match self {
            RunEvent::Completed { .. } | RunEvent::Error { .. } => true,
            RunEvent::Status { status, .. } => status.is_terminal(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Status { .. } => "status",
            RunEvent::NodeStart { .. } => "node_start",
            RunEvent::NodeComplete { .. } => "node_complete",
            RunEvent::NodeError { .. } => "node_error",
            RunEvent::NodeSkipped { .. } => "node_skipped",
            RunEvent::Completed { .. } => "completed",
            RunEvent::Error { .. } => "error",
        }
    }
}

/// Event with its run and position in that run's sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    pub run_id: Uuid,
    /// Strictly increasing per run; the subscription snapshot repeats the
    /// sequence of the last event published before it was taken
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Ordered view of one run's events
///
/// Yields a status snapshot first, then every event published after the
/// subscription was taken. Ends after a terminal event. A subscriber that
/// falls more than the channel capacity behind loses the oldest events.
pub struct RunSubscription {
    snapshot: Option<RunEventEnvelope>,
    receiver: broadcast::Receiver<RunEventEnvelope>,
    finished: bool,
}

impl RunSubscription {
    pub(crate) fn new(
        snapshot: RunEventEnvelope,
        receiver: broadcast::Receiver<RunEventEnvelope>,
    ) -> Self {
        Self {
            snapshot: Some(snapshot),
            receiver,
            finished: false,
        }
    }

    /// Subscription that yields only `snapshot`, for runs no longer live
    pub(crate) fn closed(snapshot: RunEventEnvelope) -> Self {
        let (_, receiver) = broadcast::channel(1);
        let mut subscription = Self::new(snapshot, receiver);
        subscription.finished = true;
        subscription
    }

    /// Next event, or `None` once the run has ended
    pub async fn recv(&mut self) -> Option<RunEventEnvelope> {
        if let Some(snapshot) = self.snapshot.take() {
            self.finished |= snapshot.event.is_terminal();
            return Some(snapshot);
        }
        if self.finished {
            return None;
        }

        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    self.finished = envelope.event.is_terminal();
                    return Some(envelope);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Run subscriber lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Adapt into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = RunEventEnvelope> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|envelope| (envelope, subscription))
        }))
    }
}
