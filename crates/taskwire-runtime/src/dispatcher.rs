//! The dispatcher: validates trigger requests, creates runs, and executes
//! handlers.
//!
//! `trigger` and `trigger_and_wait` share one internal dispatch routine
//! (resolve -> parse -> create -> schedule); they differ only in whether the
//! caller suspends on the run's terminal-state signal. Handler execution is
//! fully contained here: every attempt runs in its own spawned task, and any
//! failure or panic is recorded on the run instead of crossing the boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use serde_json::Value;
use taskwire_core::{
    HandlerError, ParseError, Run, RunContext, RunError, RunId, RunMeta, RunStatus, TaskDefinition,
    TaskId, TaskRunResult, TriggerHandle, TriggerOptions,
};

use crate::registry::Library;
use crate::store::{CreateOutcome, RunStore, RunStoreConfig, StoreError};

/// Errors surfaced synchronously to a triggering caller.
///
/// Handler failures are never among them; those are recorded on the run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The task id is not registered.
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// The payload was rejected by the task's parser. Never retried.
    #[error("Invalid payload for task {task}")]
    InvalidPayload {
        task: TaskId,
        #[source]
        source: ParseError,
    },

    /// Internal store failure (invariant violation or missing run).
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// First retry delay; doubles each attempt.
    pub retry_base_delay: Duration,

    /// Upper bound on the retry delay.
    pub retry_max_delay: Duration,

    /// Middleware-injected context handed to every handler as `ctx`.
    pub context: Value,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(30),
            context: Value::Null,
        }
    }
}

/// Validates, schedules, and tracks run execution.
pub struct Dispatcher {
    library: Library,
    store: Arc<RunStore>,
    config: DispatcherConfig,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<ExecutionJob>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher over a library with default configuration.
    pub fn new(library: Library) -> Arc<Self> {
        Self::with_config(library, DispatcherConfig::default())
    }

    /// Create a dispatcher with explicit configuration.
    pub fn with_config(library: Library, config: DispatcherConfig) -> Arc<Self> {
        Self::with_store_config(library, config, RunStoreConfig::default())
    }

    /// Create a dispatcher with explicit dispatcher and store configuration.
    pub fn with_store_config(
        library: Library,
        config: DispatcherConfig,
        store_config: RunStoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            library,
            store: Arc::new(RunStore::with_config(store_config)),
            config,
            lanes: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// The run store backing this dispatcher.
    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// The library this dispatcher resolves task ids in.
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Stop picking up new work. In-flight attempts finish; delayed runs stay
    /// Pending.
    pub fn shutdown(&self) {
        info!("Dispatcher shutting down");
        self.shutdown.cancel();
    }

    /// Fire-and-forget trigger: returns as soon as the run exists.
    ///
    /// Rejects only for resolution and validation failures; the handler's
    /// execution is never awaited here.
    pub async fn trigger(
        self: &Arc<Self>,
        task_id: &TaskId,
        payload: Value,
        options: TriggerOptions,
    ) -> Result<TriggerHandle, DispatchError> {
        let (id, _rx) = self.dispatch(task_id, payload, options).await?;
        Ok(TriggerHandle { id })
    }

    /// Trigger and suspend until the run reaches a terminal state.
    ///
    /// Handler failures resolve as [`TaskRunResult::Failed`], never as `Err`.
    pub async fn trigger_and_wait(
        self: &Arc<Self>,
        task_id: &TaskId,
        payload: Value,
        options: TriggerOptions,
    ) -> Result<TaskRunResult, DispatchError> {
        let (id, rx) = self.dispatch(task_id, payload, options).await?;
        self.wait_for_terminal(id, rx).await
    }

    /// Like [`trigger_and_wait`](Self::trigger_and_wait), but gives up after
    /// `timeout`.
    ///
    /// A timed-out wait yields a Failed-shaped result carrying a Timeout
    /// error; the underlying run keeps executing and its true status is not
    /// touched.
    pub async fn trigger_and_wait_timeout(
        self: &Arc<Self>,
        task_id: &TaskId,
        payload: Value,
        options: TriggerOptions,
        timeout: Duration,
    ) -> Result<TaskRunResult, DispatchError> {
        let (id, rx) = self.dispatch(task_id, payload, options).await?;
        match tokio::time::timeout(timeout, self.wait_for_terminal(id.clone(), rx)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(run_id = %id, "Wait timed out; run unaffected");
                Ok(TaskRunResult::Failed {
                    id,
                    error: RunError::timeout(),
                })
            }
        }
    }

    /// Wait for an already-triggered run to reach a terminal state.
    pub async fn wait(self: &Arc<Self>, id: &RunId) -> Result<TaskRunResult, DispatchError> {
        let rx = self.store.subscribe(id).await?;
        self.wait_for_terminal(id.clone(), rx).await
    }

    /// The single dispatch routine shared by both entry points.
    async fn dispatch(
        self: &Arc<Self>,
        task_id: &TaskId,
        payload: Value,
        options: TriggerOptions,
    ) -> Result<(RunId, watch::Receiver<RunStatus>), DispatchError> {
        let definition = self
            .library
            .get(task_id)
            .ok_or_else(|| DispatchError::UnknownTask(task_id.clone()))?
            .clone();

        let parsed = match definition.parser() {
            Some(parser) => {
                parser
                    .parse(payload)
                    .await
                    .map_err(|source| DispatchError::InvalidPayload {
                        task: task_id.clone(),
                        source,
                    })?
            }
            None => payload,
        };

        let run = Run::new(task_id.clone(), parsed, options.clone());
        let outcome = match options.concurrency_key.clone() {
            // Creation and lane enqueue happen under the same lanes guard, so
            // lane order equals creation order even when triggers race.
            Some(key) => {
                let mut lanes = self.lanes.lock().await;
                let outcome = self.store.create(run).await;
                if let CreateOutcome::Created(id) = &outcome {
                    info!(task_id = %task_id, run_id = %id, "Run created");
                    let job = self.build_job(definition, id.clone(), &options);
                    self.enqueue_lane(&mut lanes, key, job);
                }
                outcome
            }
            None => {
                let outcome = self.store.create(run).await;
                if let CreateOutcome::Created(id) = &outcome {
                    info!(task_id = %task_id, run_id = %id, "Run created");
                    let job = self.build_job(definition, id.clone(), &options);
                    tokio::spawn(job.execute());
                }
                outcome
            }
        };

        let id = match outcome {
            CreateOutcome::Created(id) | CreateOutcome::Existing(id) => id,
        };
        let rx = self.store.subscribe(&id).await?;
        Ok((id, rx))
    }

    /// Suspend until the run's status signal reports a terminal state, then
    /// read the result back out of the store.
    async fn wait_for_terminal(
        &self,
        id: RunId,
        mut rx: watch::Receiver<RunStatus>,
    ) -> Result<TaskRunResult, DispatchError> {
        loop {
            if rx.borrow_and_update().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                // Sender gone; fall through and report whatever is stored.
                break;
            }
        }

        let run = self.store.get(&id).await?;
        Ok(match run.status {
            RunStatus::Succeeded => TaskRunResult::Succeeded {
                id,
                output: run.output.unwrap_or(Value::Null),
            },
            _ => TaskRunResult::Failed {
                id,
                error: run.error.unwrap_or_else(|| {
                    RunError::handler("run did not reach a terminal state", run.attempts)
                }),
            },
        })
    }

    fn build_job(
        &self,
        definition: TaskDefinition,
        run_id: RunId,
        options: &TriggerOptions,
    ) -> ExecutionJob {
        ExecutionJob {
            definition,
            run_id,
            due: due_instant(options),
            max_attempts: options.max_attempts.unwrap_or(1).max(1),
            store: self.store.clone(),
            retry_base_delay: self.config.retry_base_delay,
            retry_max_delay: self.config.retry_max_delay,
            context: self.config.context.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Send a job down its key's lane, spinning the lane worker up on first
    /// use. The caller holds the lanes guard across create and enqueue.
    fn enqueue_lane(
        self: &Arc<Self>,
        lanes: &mut HashMap<String, mpsc::UnboundedSender<ExecutionJob>>,
        key: String,
        job: ExecutionJob,
    ) {
        let sender = lanes.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let shutdown = self.shutdown.clone();
            tokio::spawn(lane_worker(key.clone(), rx, shutdown));
            tx
        });

        if sender.send(job).is_err() {
            // Lane worker exited (shutdown); the run stays Pending.
            warn!(concurrency_key = %key, "Lane closed; run left pending");
        }
    }
}

/// Executes one lane's jobs strictly in order: at most one Running run per
/// key at any time.
async fn lane_worker(
    key: String,
    mut rx: mpsc::UnboundedReceiver<ExecutionJob>,
    shutdown: CancellationToken,
) {
    debug!(concurrency_key = %key, "Lane started");
    loop {
        // Cancellation wins over queued work: after shutdown, no new job is
        // picked up even if the queue is non-empty.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => {
                match job {
                    Some(job) => job.execute().await,
                    None => break,
                }
            }
        }
    }
    debug!(concurrency_key = %key, "Lane stopped");
}

/// One run's execution: delay, attempts, retries, terminal transition.
struct ExecutionJob {
    definition: TaskDefinition,
    run_id: RunId,
    due: Option<Instant>,
    max_attempts: u32,
    store: Arc<RunStore>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    context: Value,
    shutdown: CancellationToken,
}

impl ExecutionJob {
    async fn execute(self) {
        if let Some(due) = self.due {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(run_id = %self.run_id, "Shutdown before due time; run stays pending");
                    return;
                }
                _ = tokio::time::sleep_until(due) => {}
            }
        }

        if let Err(e) = self.run_attempts().await {
            // Store failures here are invariant violations, not user errors.
            error!(run_id = %self.run_id, error = %e, "Run execution aborted");
        }
    }

    async fn run_attempts(&self) -> Result<(), StoreError> {
        self.store.update_status(&self.run_id, RunStatus::Running).await?;
        let run = self.store.get(&self.run_id).await?;

        let mut attempt = 1u32;
        loop {
            self.store.record_attempt(&self.run_id, attempt).await?;

            let ctx = RunContext {
                meta: RunMeta {
                    run: self.run_id.clone(),
                    task: run.task_id.clone(),
                    attempt,
                },
                ctx: self.context.clone(),
                payload: run.payload.clone(),
            };

            match self.attempt(ctx).await {
                Ok(output) => {
                    info!(run_id = %self.run_id, task_id = %run.task_id, attempt, "Run succeeded");
                    self.store.complete(&self.run_id, output).await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        run_id = %self.run_id,
                        task_id = %run.task_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        self.store
                            .fail(&self.run_id, RunError::handler(e.message(), attempt))
                            .await?;
                        return Ok(());
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run one attempt in its own task so a panicking handler is contained
    /// and recorded like any other failure.
    async fn attempt(&self, ctx: RunContext<Value>) -> Result<Value, HandlerError> {
        let definition = self.definition.clone();
        match tokio::spawn(async move { definition.invoke(ctx).await }).await {
            Ok(result) => result,
            Err(join) => Err(HandlerError::msg(format!("handler panicked: {join}"))),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

fn due_instant(options: &TriggerOptions) -> Option<Instant> {
    if let Some(secs) = options.start_after_secs {
        return Some(Instant::now() + Duration::from_secs(secs));
    }
    if let Some(at) = options.start_at {
        let delay = (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        return Some(Instant::now() + delay);
    }
    None
}
