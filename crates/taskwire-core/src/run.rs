//! Run records, trigger options, and trigger results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, TaskId};
use crate::status::RunStatus;

/// Caller-supplied options for a trigger request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Deduplicates triggers: repeated triggers with the same key return the
    /// Run the key originally produced.
    pub idempotency_key: Option<String>,

    /// Bounds automatic re-execution of a failing run. Absent means a single
    /// attempt.
    pub max_attempts: Option<u32>,

    /// Delay the first execution attempt until this absolute time.
    pub start_at: Option<DateTime<Utc>>,

    /// Delay the first execution attempt by this many seconds after creation.
    pub start_after_secs: Option<u64>,

    /// Serializes execution: at most one Running run per distinct key, in
    /// creation order.
    pub concurrency_key: Option<String>,
}

impl TriggerOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Builder method to set the attempt bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Builder method to delay the first attempt until an absolute time.
    pub fn with_start_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_at = Some(at);
        self
    }

    /// Builder method to delay the first attempt by a relative number of
    /// seconds.
    pub fn with_start_after_secs(mut self, secs: u64) -> Self {
        self.start_after_secs = Some(secs);
        self
    }

    /// Builder method to set the concurrency key.
    pub fn with_concurrency_key(mut self, key: impl Into<String>) -> Self {
        self.concurrency_key = Some(key.into());
        self
    }
}

/// Kind of failure recorded against a run or returned to a waiting caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The task handler failed (or panicked).
    Handler,
    /// A waiting caller timed out; the underlying run is unaffected.
    Timeout,
}

/// Error record for a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    /// What kind of failure this is.
    pub kind: RunErrorKind,

    /// Human-readable failure message.
    pub message: String,

    /// How many attempts were made before giving up (0 for timeouts).
    pub attempts: u32,
}

impl RunError {
    /// Create a handler failure record.
    pub fn handler(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: RunErrorKind::Handler,
            message: message.into(),
            attempts,
        }
    }

    /// Create the timeout record handed to a waiting caller.
    pub fn timeout() -> Self {
        Self {
            kind: RunErrorKind::Timeout,
            message: "timed out waiting for run to reach a terminal state".to_string(),
            attempts: 0,
        }
    }
}

/// One execution instance of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier (server-generated).
    pub id: RunId,

    /// The task definition this run executes.
    pub task_id: TaskId,

    /// Current status; transitions only move forward.
    pub status: RunStatus,

    /// Post-validation payload.
    pub payload: Value,

    /// Handler output, present once Succeeded.
    pub output: Option<Value>,

    /// Failure record, present once Failed.
    pub error: Option<RunError>,

    /// Options the run was triggered with.
    pub options: TriggerOptions,

    /// Number of execution attempts made so far.
    pub attempts: u32,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new Pending run.
    pub fn new(task_id: TaskId, payload: Value, options: TriggerOptions) -> Self {
        Self {
            id: RunId::generate(),
            task_id,
            status: RunStatus::Pending,
            payload,
            output: None,
            error: None,
            options,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Builder method to set a specific id (useful for testing).
    pub fn with_id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    /// Mark the run as started.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the run as succeeded with the handler's output.
    pub fn complete(&mut self, output: Value) {
        self.status = RunStatus::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, error: RunError) {
        self.status = RunStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serializable projection for retrieval surfaces.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            task_id: self.task_id.clone(),
            status: self.status,
            output: self.output.clone(),
            error: self.error.clone(),
            attempts: self.attempts,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Projection of a Run returned by retrieval surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub id: RunId,

    /// The task definition this run executes.
    pub task_id: TaskId,

    /// Current status.
    pub status: RunStatus,

    /// Handler output, present once Succeeded.
    pub output: Option<Value>,

    /// Failure record, present once Failed.
    pub error: Option<RunError>,

    /// Number of execution attempts made so far.
    pub attempts: u32,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        run.summary()
    }
}

/// Returned by a fire-and-forget trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerHandle {
    /// The created (or idempotently reused) run's id.
    pub id: RunId,
}

/// Result of a trigger-and-wait call.
///
/// Handler failures never surface as `Err` from the dispatcher; they arrive
/// here as the `Failed` variant, distinguishing "request malformed" from
/// "task ran and failed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskRunResult {
    /// The run reached Succeeded.
    Succeeded {
        /// The run's id.
        id: RunId,
        /// The handler's output.
        output: Value,
    },
    /// The run reached Failed, or the wait timed out.
    Failed {
        /// The run's id.
        id: RunId,
        /// The failure record.
        error: RunError,
    },
}

impl TaskRunResult {
    /// Returns true for the Succeeded variant.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The run id, regardless of outcome.
    pub fn id(&self) -> &RunId {
        match self {
            Self::Succeeded { id, .. } | Self::Failed { id, .. } => id,
        }
    }

    /// The output, if the run succeeded.
    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Succeeded { output, .. } => Some(output),
            Self::Failed { .. } => None,
        }
    }

    /// The error, if the run failed or the wait timed out.
    pub fn error(&self) -> Option<&RunError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}
