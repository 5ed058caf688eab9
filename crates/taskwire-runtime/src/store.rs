//! In-memory run store.
//!
//! The single shared mutable resource of the runtime. One lock guards the run
//! map and the idempotency index together, so idempotency-check-then-create
//! is one critical section and mutations to a given run never interleave.
//! Every status change is published on a per-run watch channel; waiting
//! callers subscribe to it as the terminal-state signal.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use taskwire_core::{Run, RunError, RunId, RunStatus};

/// Run store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Run not found.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Attempted a non-forward status transition. This is an internal
    /// invariant violation, not a user-recoverable condition.
    #[error("Invalid status transition for run {run}: {from:?} -> {to:?}")]
    InvalidTransition {
        run: RunId,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Outcome of an idempotency-aware create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new run was stored.
    Created(RunId),
    /// The idempotency key matched a prior non-expired run.
    Existing(RunId),
}

impl CreateOutcome {
    /// The run id, whether created or reused.
    pub fn id(&self) -> &RunId {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RunStoreConfig {
    /// How long a terminal run keeps pinning its idempotency key. Once the
    /// run has been terminal for longer than this, the key admits a fresh
    /// run.
    pub idempotency_ttl: Duration,
}

impl Default for RunStoreConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Run counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

struct RunEntry {
    run: Run,
    status_tx: watch::Sender<RunStatus>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<RunId, RunEntry>,
    idempotency: HashMap<String, RunId>,
}

/// In-memory run store.
pub struct RunStore {
    inner: RwLock<Inner>,
    config: RunStoreConfig,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    /// Create a store with default configuration.
    pub fn new() -> Self {
        Self::with_config(RunStoreConfig::default())
    }

    /// Create a store with explicit configuration.
    pub fn with_config(config: RunStoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
        }
    }

    /// Store a new run, honoring its idempotency key.
    ///
    /// If the key maps to a prior run that is not yet terminal-and-expired,
    /// that run's id is returned instead and nothing is created. Lookup and
    /// insert happen under one write lock.
    pub async fn create(&self, run: Run) -> CreateOutcome {
        let mut inner = self.inner.write().await;

        if let Some(key) = run.options.idempotency_key.clone() {
            if let Some(existing_id) = inner.idempotency.get(&key).cloned() {
                let expired = inner
                    .runs
                    .get(&existing_id)
                    .map(|entry| self.key_expired(&entry.run))
                    .unwrap_or(true);
                if expired {
                    inner.idempotency.remove(&key);
                } else {
                    debug!(
                        run_id = %existing_id,
                        idempotency_key = %key,
                        "Trigger deduplicated against existing run"
                    );
                    return CreateOutcome::Existing(existing_id);
                }
            }
            inner.idempotency.insert(key, run.id.clone());
        }

        let id = run.id.clone();
        let (status_tx, _) = watch::channel(run.status);
        inner.runs.insert(id.clone(), RunEntry { run, status_tx });
        CreateOutcome::Created(id)
    }

    /// Retrieve a run by id.
    pub async fn get(&self, id: &RunId) -> Result<Run, StoreError> {
        let inner = self.inner.read().await;
        inner
            .runs
            .get(id)
            .map(|entry| entry.run.clone())
            .ok_or_else(|| StoreError::RunNotFound(id.clone()))
    }

    /// Subscribe to a run's status changes.
    pub async fn subscribe(&self, id: &RunId) -> Result<watch::Receiver<RunStatus>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .runs
            .get(id)
            .map(|entry| entry.status_tx.subscribe())
            .ok_or_else(|| StoreError::RunNotFound(id.clone()))
    }

    /// Move a run to a successor status, enforcing forward-only transitions.
    pub async fn update_status(&self, id: &RunId, to: RunStatus) -> Result<(), StoreError> {
        self.mutate(id, |run| {
            match to {
                RunStatus::Running => run.start(),
                // Succeeded/Failed normally go through complete/fail so the
                // result lands together with the transition.
                other => {
                    run.status = other;
                    if other.is_terminal() {
                        run.finished_at = Some(Utc::now());
                    }
                }
            }
        }, to)
        .await
    }

    /// Mark a run succeeded, storing the handler output.
    pub async fn complete(&self, id: &RunId, output: serde_json::Value) -> Result<(), StoreError> {
        self.mutate(id, |run| run.complete(output), RunStatus::Succeeded)
            .await
    }

    /// Mark a run failed, storing the error record.
    pub async fn fail(&self, id: &RunId, error: RunError) -> Result<(), StoreError> {
        self.mutate(id, |run| run.fail(error), RunStatus::Failed).await
    }

    /// Record the attempt counter on a run.
    pub async fn record_attempt(&self, id: &RunId, attempt: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.clone()))?;
        entry.run.attempts = attempt;
        Ok(())
    }

    /// Look up the run a key currently maps to, if any and not expired.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<Run> {
        let inner = self.inner.read().await;
        let id = inner.idempotency.get(key)?;
        let entry = inner.runs.get(id)?;
        if self.key_expired(&entry.run) {
            None
        } else {
            Some(entry.run.clone())
        }
    }

    /// Run counts by status.
    pub async fn counts(&self) -> RunCounts {
        let inner = self.inner.read().await;
        let mut counts = RunCounts::default();
        for entry in inner.runs.values() {
            match entry.run.status {
                RunStatus::Pending => counts.pending += 1,
                RunStatus::Running => counts.running += 1,
                RunStatus::Succeeded => counts.succeeded += 1,
                RunStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Total number of stored runs.
    pub async fn run_count(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    fn key_expired(&self, run: &Run) -> bool {
        if !run.is_terminal() {
            return false;
        }
        let Some(finished_at) = run.finished_at else {
            return false;
        };
        let Ok(ttl) = chrono::Duration::from_std(self.config.idempotency_ttl) else {
            return false;
        };
        Utc::now() - finished_at > ttl
    }

    async fn mutate(
        &self,
        id: &RunId,
        apply: impl FnOnce(&mut Run),
        to: RunStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.clone()))?;

        let from = entry.run.status;
        if !from.can_transition_to(to) {
            warn!(run_id = %id, ?from, ?to, "Rejected status transition");
            return Err(StoreError::InvalidTransition {
                run: id.clone(),
                from,
                to,
            });
        }

        apply(&mut entry.run);
        entry.status_tx.send_replace(to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwire_core::{TaskId, TriggerOptions};

    fn pending_run(options: TriggerOptions) -> Run {
        Run::new(TaskId::new("echo"), json!({ "a": 1 }), options)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = RunStore::new();
        let run = pending_run(TriggerOptions::new());
        let id = run.id.clone();

        assert_eq!(store.create(run).await, CreateOutcome::Created(id.clone()));
        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Pending);
        assert_eq!(stored.payload, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_get_missing_run() {
        let store = RunStore::new();
        let err = store.get(&RunId::new("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_idempotent_create_returns_existing() {
        let store = RunStore::new();
        let options = TriggerOptions::new().with_idempotency_key("key-1");

        let first = store.create(pending_run(options.clone())).await;
        let second = store.create(pending_run(options)).await;

        let CreateOutcome::Created(first_id) = first else {
            panic!("expected Created");
        };
        assert_eq!(second, CreateOutcome::Existing(first_id.clone()));
        assert_eq!(store.run_count().await, 1);

        let found = store.find_by_idempotency_key("key-1").await.unwrap();
        assert_eq!(found.id, first_id);
    }

    #[tokio::test]
    async fn test_expired_idempotency_key_admits_fresh_run() {
        let store = RunStore::with_config(RunStoreConfig {
            idempotency_ttl: Duration::ZERO,
        });
        let options = TriggerOptions::new().with_idempotency_key("key-1");

        let first = store.create(pending_run(options.clone())).await;
        let first_id = first.id().clone();
        store.update_status(&first_id, RunStatus::Running).await.unwrap();
        store.complete(&first_id, json!(1)).await.unwrap();

        // Terminal and past the (zero) TTL: the key no longer pins the run.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.find_by_idempotency_key("key-1").await.is_none());

        let second = store.create(pending_run(options)).await;
        assert!(matches!(second, CreateOutcome::Created(_)));
        assert_ne!(second.id(), &first_id);
        assert_eq!(store.run_count().await, 2);
    }

    #[tokio::test]
    async fn test_forward_transitions_and_results() {
        let store = RunStore::new();
        let id = store.create(pending_run(TriggerOptions::new())).await.id().clone();

        store.update_status(&id, RunStatus::Running).await.unwrap();
        store.complete(&id, json!({ "done": true })).await.unwrap();

        let run = store.get(&id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output, Some(json!({ "done": true })));
        assert!(run.started_at.is_some());
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = RunStore::new();
        let id = store.create(pending_run(TriggerOptions::new())).await.id().clone();

        // Pending cannot jump straight to Succeeded.
        let err = store.complete(&id, json!(null)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store.update_status(&id, RunStatus::Running).await.unwrap();
        store.fail(&id, RunError::handler("boom", 1)).await.unwrap();

        // Terminal runs are immutable.
        let err = store.update_status(&id, RunStatus::Running).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        let err = store.complete(&id, json!(null)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_subscribe_observes_terminal_state() {
        let store = RunStore::new();
        let id = store.create(pending_run(TriggerOptions::new())).await.id().clone();
        let mut rx = store.subscribe(&id).await.unwrap();
        assert_eq!(*rx.borrow(), RunStatus::Pending);

        store.update_status(&id, RunStatus::Running).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RunStatus::Running);

        store.complete(&id, json!(null)).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_terminal());
    }

    #[tokio::test]
    async fn test_counts() {
        let store = RunStore::new();
        let a = store.create(pending_run(TriggerOptions::new())).await.id().clone();
        let _b = store.create(pending_run(TriggerOptions::new())).await;

        store.update_status(&a, RunStatus::Running).await.unwrap();
        let counts = store.counts().await;
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.succeeded + counts.failed, 0);
    }
}
