//! Mutation task orchestration.
//!
//! Membership changes run server-side as tasks. For each entity (sector id):
//!
//! ```text
//! Idle ──enqueue──▶ Pending ──poll: succeeded──▶ (cleared, refresh requested)
//!                      │
//!                      └──poll: failed / poll error / timeout──▶ Failed
//! Failed ──dismiss──▶ Idle          Failed ──enqueue (retry)──▶ Pending
//! ```
//!
//! The pending check and the slot reservation happen under one lock before any
//! await, so two concurrent enqueues for the same entity can never both proceed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use sectorpulse_core::ValidationError;

use crate::api::{TaskRecord, TaskStatus};
use crate::error::ClientError;

/// Message shown when a second mutation is attempted while one is pending.
pub const ALREADY_RUNNING_MESSAGE: &str = "A sector update is already running.";

const EVENT_CAPACITY: usize = 64;

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Add,
    Remove,
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Succeeded,
    Failed,
}

/// What the mutation is about, kept for display and for applying the change locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationMeta {
    pub symbol: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationTask {
    /// `None` while the initiating request is still in flight.
    pub task_id: Option<String>,
    pub entity_id: String,
    pub action: MutationAction,
    pub state: TaskState,
    pub message: Option<String>,
    pub meta: MutationMeta,
    /// Polls made so far.
    pub attempts: u32,
}

/// Exponential poll schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            growth_factor: 1.5,
            max_delay_ms: 8_000,
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    /// Delay before poll number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let growth = self.growth_factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = (self.initial_delay_ms as f64 * growth).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.round() as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    Started(MutationTask),
    Succeeded(MutationTask),
    Failed(MutationTask),
    /// Data touched by the entity changed; the next fetch should skip the cache.
    RefreshRequested { entity_id: String },
    Dismissed { entity_id: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("A sector update is already running.")]
    AlreadyRunning { entity_id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Request(#[from] ClientError),
}

/// Where task status comes from.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<TaskRecord, ClientError>;
}

// ── Orchestrator ─────────────────────────────────────────────────────

struct Slot {
    generation: u64,
    task: MutationTask,
}

struct Inner {
    policy: PollPolicy,
    source: Arc<dyn TaskSource>,
    slots: Mutex<HashMap<String, Slot>>,
    loops: Mutex<HashMap<String, JoinHandle<()>>>,
    events: broadcast::Sender<MutationEvent>,
    next_generation: AtomicU64,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn TaskSource>, policy: PollPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                policy,
                source,
                slots: Mutex::new(HashMap::new()),
                loops: Mutex::new(HashMap::new()),
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.inner.policy
    }

    /// Start a mutation for `entity_id`.
    ///
    /// `request` performs the initiating call and returns the server task id. It is
    /// not invoked when a task for the entity is already pending. Must be called
    /// inside a tokio runtime; the poll loop is spawned onto it.
    pub async fn enqueue<F, Fut>(
        &self,
        entity_id: &str,
        action: MutationAction,
        meta: MutationMeta,
        request: F,
    ) -> Result<MutationTask, MutationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ClientError>>,
    {
        let reservation = self.reserve(entity_id, action, meta)?;
        match request().await {
            Ok(task_id) => Ok(reservation.commit(task_id)),
            Err(e) => {
                tracing::warn!(entity_id, ?action, error = %e, "mutation request failed");
                Err(MutationError::Request(e))
            }
        }
    }

    fn reserve(
        &self,
        entity_id: &str,
        action: MutationAction,
        meta: MutationMeta,
    ) -> Result<Reservation, MutationError> {
        let mut slots = self.inner.slots.lock();
        if slots
            .get(entity_id)
            .is_some_and(|s| s.task.state == TaskState::Pending)
        {
            tracing::info!(entity_id, ?action, "mutation rejected: already running");
            return Err(MutationError::AlreadyRunning {
                entity_id: entity_id.to_string(),
            });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = MutationTask {
            task_id: None,
            entity_id: entity_id.to_string(),
            action,
            state: TaskState::Pending,
            message: None,
            meta,
            attempts: 0,
        };
        let previous = slots
            .insert(
                entity_id.to_string(),
                Slot {
                    generation,
                    task: task.clone(),
                },
            )
            .map(|s| s.task);

        Ok(Reservation {
            inner: Arc::clone(&self.inner),
            generation,
            task,
            previous,
            armed: true,
        })
    }

    pub fn task(&self, entity_id: &str) -> Option<MutationTask> {
        self.inner.slots.lock().get(entity_id).map(|s| s.task.clone())
    }

    /// All tracked tasks, ordered by entity id.
    pub fn tasks(&self) -> Vec<MutationTask> {
        let mut tasks: Vec<MutationTask> =
            self.inner.slots.lock().values().map(|s| s.task.clone()).collect();
        tasks.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        tasks
    }

    pub fn is_pending(&self, entity_id: &str) -> bool {
        self.task(entity_id)
            .is_some_and(|t| t.state == TaskState::Pending)
    }

    /// Forget a finished task. Pending tasks cannot be dismissed.
    pub fn dismiss(&self, entity_id: &str) -> bool {
        let removed = {
            let mut slots = self.inner.slots.lock();
            match slots.get(entity_id) {
                Some(slot) if slot.task.state != TaskState::Pending => {
                    slots.remove(entity_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.inner.emit(MutationEvent::Dismissed {
                entity_id: entity_id.to_string(),
            });
        }
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.events.subscribe()
    }

    /// Stop every poll loop. Tasks still pending are marked failed.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.inner.loops.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.abort();
        }
        let stopped: Vec<MutationTask> = {
            let mut slots = self.inner.slots.lock();
            slots
                .values_mut()
                .filter(|s| s.task.state == TaskState::Pending && s.task.task_id.is_some())
                .map(|s| {
                    s.task.state = TaskState::Failed;
                    s.task.message = Some("Polling stopped before the task finished".into());
                    s.task.clone()
                })
                .collect()
        };
        for task in stopped {
            self.inner.emit(MutationEvent::Failed(task));
        }
    }
}

/// A held slot. Dropping it without `commit` releases the slot and restores
/// whatever finished task it displaced.
struct Reservation {
    inner: Arc<Inner>,
    generation: u64,
    task: MutationTask,
    previous: Option<MutationTask>,
    armed: bool,
}

impl Reservation {
    fn commit(mut self, task_id: String) -> MutationTask {
        self.armed = false;
        let mut task = self.task.clone();
        task.task_id = Some(task_id.clone());
        let entity_id = task.entity_id.clone();

        self.inner.slots.lock().insert(
            entity_id.clone(),
            Slot {
                generation: self.generation,
                task: task.clone(),
            },
        );

        tracing::info!(entity_id = %entity_id, task_id = %task_id, action = ?task.action, "mutation task started");
        self.inner.emit(MutationEvent::Started(task.clone()));

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            entity_id.clone(),
            self.generation,
            task_id,
        ));
        if let Some(old) = self.inner.loops.lock().insert(entity_id, handle) {
            old.abort();
        }
        task
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.inner.slots.lock();
        let entity_id = &self.task.entity_id;
        if slots.get(entity_id).is_some_and(|s| s.generation == self.generation) {
            match self.previous.take() {
                Some(previous) => {
                    slots.insert(
                        entity_id.clone(),
                        Slot {
                            generation: self.generation,
                            task: previous,
                        },
                    );
                }
                None => {
                    slots.remove(entity_id);
                }
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: MutationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn record_attempt(&self, entity_id: &str, generation: u64, attempts: u32) {
        if let Some(slot) = self.slots.lock().get_mut(entity_id) {
            if slot.generation == generation {
                slot.task.attempts = attempts;
            }
        }
    }

    fn succeed(&self, entity_id: &str, generation: u64) {
        let finished = {
            let mut slots = self.slots.lock();
            match slots.get(entity_id) {
                Some(slot) if slot.generation == generation => slots.remove(entity_id).map(|s| s.task),
                _ => None,
            }
        };
        let Some(mut task) = finished else {
            return;
        };
        task.state = TaskState::Succeeded;
        tracing::info!(entity_id, attempts = task.attempts, "mutation task succeeded");
        self.emit(MutationEvent::Succeeded(task));
        self.emit(MutationEvent::RefreshRequested {
            entity_id: entity_id.to_string(),
        });
    }

    fn fail(&self, entity_id: &str, generation: u64, message: String) {
        let failed = {
            let mut slots = self.slots.lock();
            match slots.get_mut(entity_id) {
                Some(slot) if slot.generation == generation => {
                    slot.task.state = TaskState::Failed;
                    slot.task.message = Some(message);
                    Some(slot.task.clone())
                }
                _ => None,
            }
        };
        if let Some(task) = failed {
            tracing::warn!(entity_id, message = ?task.message, "mutation task failed");
            self.emit(MutationEvent::Failed(task));
        }
    }
}

async fn poll_loop(inner: Arc<Inner>, entity_id: String, generation: u64, task_id: String) {
    let policy = inner.policy.clone();
    for attempt in 0..policy.max_attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
        inner.record_attempt(&entity_id, generation, attempt + 1);

        match inner.source.task_status(&task_id).await {
            Ok(record) => match record.status {
                TaskStatus::Succeeded => {
                    inner.succeed(&entity_id, generation);
                    return;
                }
                TaskStatus::Failed => {
                    let message = record
                        .message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| format!("Task {task_id} failed"));
                    inner.fail(&entity_id, generation, message);
                    return;
                }
                TaskStatus::Queued | TaskStatus::Running => {
                    tracing::debug!(entity_id = %entity_id, task_id = %task_id, attempt, "task still running");
                }
            },
            Err(e) => {
                inner.fail(
                    &entity_id,
                    generation,
                    format!("Polling task {task_id} failed: {e}"),
                );
                return;
            }
        }
    }
    inner.fail(
        &entity_id,
        generation,
        format!("Timed out waiting for task {task_id}"),
    );
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Replays a fixed sequence of poll outcomes; repeats the last one forever.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<TaskStatus, ClientError>>>,
        message: Option<String>,
        polls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<TaskStatus, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                message: None,
                polls: AtomicUsize::new(0),
            })
        }

        fn failing_with(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(vec![Ok(TaskStatus::Failed)].into()),
                message: Some(message.to_string()),
                polls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskSource for Scripted {
        async fn task_status(&self, task_id: &str) -> Result<TaskRecord, ClientError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let outcome = {
                let mut q = self.outcomes.lock();
                if q.len() > 1 {
                    q.pop_front()
                } else {
                    q.front().cloned()
                }
            };
            let status = outcome.unwrap_or(Ok(TaskStatus::Running))?;
            Ok(TaskRecord {
                id: task_id.to_string(),
                status,
                message: self.message.clone(),
                meta: serde_json::Value::Null,
            })
        }
    }

    fn meta(symbol: &str) -> MutationMeta {
        MutationMeta {
            symbol: Some(symbol.to_string()),
            ..MutationMeta::default()
        }
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<MutationEvent>) -> MutationEvent {
        loop {
            match rx.recv().await.unwrap() {
                e @ (MutationEvent::Succeeded(_) | MutationEvent::Failed(_)) => return e,
                _ => continue,
            }
        }
    }

    #[test]
    fn poll_schedule_grows_and_caps() {
        let policy = PollPolicy::default();
        let delays: Vec<u64> = (0..8).map(|i| policy.delay_for(i).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5063, 7594, 8000, 8000]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_enqueue_is_rejected_without_network_call() {
        let source = Scripted::new(vec![Ok(TaskStatus::Running)]);
        let orch = Orchestrator::new(source, PollPolicy::default());

        let first = orch
            .enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".to_string()) })
            .await
            .unwrap();
        assert_eq!(first.task_id.as_deref(), Some("t-1"));

        let called = AtomicBool::new(false);
        let flag = &called;
        let err = orch
            .enqueue("tech", MutationAction::Remove, meta("AAPL"), move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok("t-2".to_string())
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), ALREADY_RUNNING_MESSAGE);
        assert!(!called.load(Ordering::SeqCst));
        let task = orch.task("tech").unwrap();
        assert_eq!(task.task_id.as_deref(), Some("t-1"));
        assert_eq!(task.action, MutationAction::Add);
        orch.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn other_entities_are_independent() {
        let source = Scripted::new(vec![Ok(TaskStatus::Running)]);
        let orch = Orchestrator::new(source, PollPolicy::default());

        orch.enqueue("tech", MutationAction::Add, meta("A"), || async { Ok("t-1".into()) })
            .await
            .unwrap();
        orch.enqueue("energy", MutationAction::Add, meta("B"), || async { Ok("t-2".into()) })
            .await
            .unwrap();
        assert_eq!(orch.tasks().len(), 2);
        orch.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_releases_reservation() {
        let source = Scripted::new(vec![Ok(TaskStatus::Running)]);
        let orch = Orchestrator::new(source.clone(), PollPolicy::default());

        let err = orch
            .enqueue("tech", MutationAction::Add, meta("XYZ"), || async {
                Err(ClientError::Http {
                    status: 409,
                    message: "conflict".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Request(ClientError::Http { status: 409, .. })));
        assert!(orch.task("tech").is_none());
        assert_eq!(source.polls.load(Ordering::SeqCst), 0);

        // Slot is free again
        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-9".into()) })
            .await
            .unwrap();
        assert!(orch.is_pending("tech"));
        orch.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_task_and_requests_refresh() {
        let source = Scripted::new(vec![
            Ok(TaskStatus::Queued),
            Ok(TaskStatus::Running),
            Ok(TaskStatus::Succeeded),
        ]);
        let orch = Orchestrator::new(source.clone(), PollPolicy::default());
        let mut rx = orch.subscribe();
        let started = tokio::time::Instant::now();

        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".into()) })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), MutationEvent::Started(_)));
        match rx.recv().await.unwrap() {
            MutationEvent::Succeeded(task) => {
                assert_eq!(task.state, TaskState::Succeeded);
                assert_eq!(task.attempts, 3);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            MutationEvent::RefreshRequested {
                entity_id: "tech".into()
            }
        );

        // 1s + 1.5s + 2.25s of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(4750));
        assert!(orch.task("tech").is_none());
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_failure_is_retained_until_dismissed() {
        let orch = Orchestrator::new(Scripted::failing_with("XYZ is not a known symbol"), PollPolicy::default());
        let mut rx = orch.subscribe();

        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".into()) })
            .await
            .unwrap();
        let MutationEvent::Failed(task) = next_terminal(&mut rx).await else {
            panic!("expected failure");
        };
        assert_eq!(task.message.as_deref(), Some("XYZ is not a known symbol"));

        let kept = orch.task("tech").unwrap();
        assert_eq!(kept.state, TaskState::Failed);

        assert!(orch.dismiss("tech"));
        assert!(orch.task("tech").is_none());
        assert!(!orch.dismiss("tech"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_replaces_failed_task() {
        let orch = Orchestrator::new(Scripted::failing_with("boom"), PollPolicy::default());
        let mut rx = orch.subscribe();

        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".into()) })
            .await
            .unwrap();
        next_terminal(&mut rx).await;

        let retry = orch
            .enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-2".into()) })
            .await
            .unwrap();
        assert_eq!(retry.state, TaskState::Pending);
        assert_eq!(orch.task("tech").unwrap().task_id.as_deref(), Some("t-2"));
        orch.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_retry_restores_previous_failure() {
        let orch = Orchestrator::new(Scripted::failing_with("boom"), PollPolicy::default());
        let mut rx = orch.subscribe();

        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".into()) })
            .await
            .unwrap();
        next_terminal(&mut rx).await;

        let _ = orch
            .enqueue("tech", MutationAction::Add, meta("XYZ"), || async {
                Err(ClientError::Transport("offline".into()))
            })
            .await;
        let task = orch.task("tech").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_time_out() {
        let source = Scripted::new(vec![Ok(TaskStatus::Running)]);
        let policy = PollPolicy {
            max_attempts: 3,
            ..PollPolicy::default()
        };
        let orch = Orchestrator::new(source.clone(), policy);
        let mut rx = orch.subscribe();

        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-7".into()) })
            .await
            .unwrap();
        let MutationEvent::Failed(task) = next_terminal(&mut rx).await else {
            panic!("expected timeout");
        };
        assert_eq!(task.message.as_deref(), Some("Timed out waiting for task t-7"));
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_is_terminal() {
        let source = Scripted::new(vec![
            Ok(TaskStatus::Running),
            Err(ClientError::Transport("connection reset".into())),
            Ok(TaskStatus::Succeeded),
        ]);
        let orch = Orchestrator::new(source.clone(), PollPolicy::default());
        let mut rx = orch.subscribe();

        orch.enqueue("tech", MutationAction::Remove, meta("AAPL"), || async { Ok("t-3".into()) })
            .await
            .unwrap();
        let MutationEvent::Failed(task) = next_terminal(&mut rx).await else {
            panic!("expected failure");
        };
        assert!(task.message.unwrap().contains("connection reset"));
        assert_eq!(source.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_task_cannot_be_dismissed() {
        let orch = Orchestrator::new(Scripted::new(vec![Ok(TaskStatus::Running)]), PollPolicy::default());
        orch.enqueue("tech", MutationAction::Add, meta("XYZ"), || async { Ok("t-1".into()) })
            .await
            .unwrap();
        assert!(!orch.dismiss("tech"));
        orch.shutdown();
        assert_eq!(orch.task("tech").unwrap().state, TaskState::Failed);
    }
}
