//! Registry of in-flight and recently finished runs
//!
//! Each run owns its state behind a lock and a broadcast channel for its
//! events. Every state change publishes its event while the state lock is
//! held, so subscribers see events in the order the state changed and a
//! snapshot never misses or repeats one.
//!
//! Terminal transitions are the exception: the record is persisted with the
//! state lock released and the terminal event is published afterwards. A
//! per-run settle lock spans the whole transition; [`RunHandle::settled`]
//! waits on it.

pub mod events;

pub use events::{RunEvent, RunEventEnvelope, RunSubscription};

use crate::core::config::EngineConfig;
use crate::core::{RunState, RunStatusView, StepOutput};
use crate::persistence::{PersistenceBackend, RunRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CANCELLED_MESSAGE: &str = "Run cancelled";

/// One run: its state, event channel and cancellation token
pub struct RunHandle {
    id: Uuid,
    state: RwLock<RunState>,
    events: broadcast::Sender<RunEventEnvelope>,
    sequence: AtomicU64,
    cancel: CancellationToken,
    /// Held from a terminal transition until its event is published
    settle: Mutex<()>,
}

impl RunHandle {
    fn new(state: RunState, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            id: state.id,
            state: RwLock::new(state),
            events,
            sequence: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            settle: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn snapshot(&self) -> RunState {
        self.state.read().await.clone()
    }

    pub async fn view(&self) -> RunStatusView {
        self.state.read().await.view()
    }

    pub async fn is_terminal(&self) -> bool {
        self.state.read().await.is_terminal()
    }

    /// Token cancelled when the run is cancelled or the registry shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Caller must hold the state write lock
    fn publish(&self, event: RunEvent) {
        let envelope = RunEventEnvelope {
            run_id: self.id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            event,
        };
        debug!("Run {} event #{}: {}", self.id, envelope.sequence, envelope.event.kind());
        // No receivers is fine; events are not buffered for future subscribers
        let _ = self.events.send(envelope);
    }

    /// Publish a terminal event once the record is saved
    async fn publish_terminal(&self, event: RunEvent) {
        let _state = self.state.write().await;
        self.publish(event);
    }

    /// Resolves once a terminal transition in progress is persisted and published
    pub async fn settled(&self) {
        let _settle = self.settle.lock().await;
    }

    /// Snapshot plus every later event
    pub async fn subscribe(&self) -> RunSubscription {
        let state = self.state.read().await;
        let receiver = self.events.subscribe();
        let snapshot = RunEventEnvelope {
            run_id: self.id,
            sequence: self.sequence.load(Ordering::SeqCst),
            timestamp: Utc::now(),
            event: RunEvent::Status {
                status: state.status,
                progress: state.progress,
                current_agent: state.current_agent.clone(),
            },
        };
        RunSubscription::new(snapshot, receiver)
    }

    /// Returns `false` when the run already ended
    pub async fn node_started(&self, step_id: &str, role: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.mark_started(role) {
            return false;
        }
        self.publish(RunEvent::NodeStart {
            step_id: step_id.to_string(),
            role: role.to_string(),
        });
        true
    }

    /// Record a step output; late or duplicate outputs are discarded
    pub async fn node_completed(&self, step_id: &str, role: &str, output: StepOutput) -> bool {
        let mut state = self.state.write().await;
        if !state.record_output(step_id, output.clone()) {
            debug!("Run {} discarded output of step {}", self.id, step_id);
            return false;
        }
        let progress = state.progress;
        self.publish(RunEvent::NodeComplete {
            step_id: step_id.to_string(),
            role: role.to_string(),
            progress,
            output,
        });
        true
    }

    pub async fn node_failed(&self, step_id: &str, role: &str, message: &str) -> bool {
        let state = self.state.write().await;
        if state.is_terminal() {
            return false;
        }
        self.publish(RunEvent::NodeError {
            step_id: step_id.to_string(),
            role: role.to_string(),
            message: message.to_string(),
        });
        true
    }

    pub async fn node_skipped(&self, step_id: &str, role: &str) -> bool {
        let state = self.state.write().await;
        if state.is_terminal() {
            return false;
        }
        self.publish(RunEvent::NodeSkipped {
            step_id: step_id.to_string(),
            role: role.to_string(),
        });
        true
    }
}

/// Owns every run the engine knows about
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, Arc<RunHandle>>>,
    store: Arc<dyn PersistenceBackend>,
    event_buffer: usize,
    retention: Duration,
    shutdown: CancellationToken,
}

impl RunRegistry {
    pub fn new(store: Arc<dyn PersistenceBackend>, config: &EngineConfig) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            store,
            event_buffer: config.event_buffer,
            retention: Duration::from_secs(config.retention_secs),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistenceBackend> {
        &self.store
    }

    /// Register a new run
    pub async fn create(&self, state: RunState) -> Arc<RunHandle> {
        let handle = Arc::new(RunHandle::new(state, self.event_buffer));
        if self.shutdown.is_cancelled() {
            handle.cancel.cancel();
        }
        self.runs.write().await.insert(handle.id, handle.clone());
        handle
    }

    pub async fn get(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// Runs that have not reached a terminal status, oldest first
    pub async fn list_active(&self) -> Vec<RunStatusView> {
        let handles: Vec<_> = self.runs.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for handle in handles {
            let view = handle.view().await;
            if !view.status.is_terminal() {
                active.push(view);
            }
        }
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Mark the run completed, persist it, then publish `completed`
    pub async fn complete(&self, handle: &RunHandle) -> bool {
        let _settle = handle.settle.lock().await;
        let record = {
            let mut state = handle.state.write().await;
            if !state.complete() {
                return false;
            }
            RunRecord::from(&*state)
        };
        // Terminal state takes no further writes, so the lock is not needed here
        self.persist(&record).await;
        info!("Run {} completed", handle.id);
        handle
            .publish_terminal(RunEvent::Completed {
                progress: record.progress,
            })
            .await;
        true
    }

    /// Mark the run failed, persist it, then publish `error`
    pub async fn fail(&self, handle: &RunHandle, message: &str) -> bool {
        let _settle = handle.settle.lock().await;
        let record = {
            let mut state = handle.state.write().await;
            if !state.fail(message) {
                return false;
            }
            RunRecord::from(&*state)
        };
        self.persist(&record).await;
        warn!("Run {} failed: {}", handle.id, message);
        handle
            .publish_terminal(RunEvent::Error {
                message: message.to_string(),
            })
            .await;
        true
    }

    /// Stop a run; steps already in flight are detached
    pub async fn cancel(&self, handle: &RunHandle) -> bool {
        handle.cancel.cancel();
        self.fail(handle, CANCELLED_MESSAGE).await
    }

    async fn persist(&self, record: &RunRecord) {
        if let Err(e) = self.store.save_run(record).await {
            warn!("Failed to persist run {}: {:#}", record.run_id, e);
        }
    }

    /// Drop terminal runs that finished longer ago than the retention period
    pub async fn sweep(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let cutoff = Utc::now().checked_sub_signed(retention);

        let handles: Vec<_> = self.runs.read().await.values().cloned().collect();
        let mut expired = Vec::new();
        for handle in handles {
            let state = handle.state.read().await;
            let finished_before_cutoff = match (state.finished_at, cutoff) {
                (Some(finished), Some(cutoff)) => finished <= cutoff,
                _ => false,
            };
            if state.is_terminal() && finished_before_cutoff {
                expired.push(handle.id);
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut runs = self.runs.write().await;
        for id in &expired {
            runs.remove(id);
        }
        debug!("Swept {} expired runs", expired.len());
        expired.len()
    }

    /// Sweep periodically until shutdown
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Run reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.sweep().await;
                    }
                }
            }
        })
    }

    /// Stop the reaper and cancel every run still going
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.runs.read().await.values().cloned().collect();
        for handle in handles {
            if self.cancel(&handle).await {
                info!("Cancelled run {} on shutdown", handle.id);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
