//! The client: typed trigger entry points over a dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use taskwire_core::{RunError, RunId, TaskHandle, TaskRunResult, TriggerHandle, TriggerOptions};
use taskwire_runtime::{Dispatcher, DispatcherConfig, Library};

use crate::error::ClientError;
use crate::facade::GroupRef;
use crate::runs::Runs;

/// Result of a typed trigger-and-wait call, with the output deserialized to
/// the task's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRunResult<O> {
    /// The run reached Succeeded.
    Succeeded {
        /// The run's id.
        id: RunId,
        /// The handler's output.
        output: O,
    },
    /// The run reached Failed, or the wait timed out.
    Failed {
        /// The run's id.
        id: RunId,
        /// The failure record.
        error: RunError,
    },
}

impl<O> TypedRunResult<O> {
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
    pub fn output(&self) -> Option<&O> {
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

/// Typed client over a task library.
pub struct Client {
    dispatcher: Arc<Dispatcher>,
    /// Run retrieval surface (`client.runs.retrieve(...)`).
    pub runs: Runs,
}

impl Client {
    /// Build a client (and its dispatcher) over a library.
    pub fn new(library: Library) -> Self {
        Self::from_dispatcher(Dispatcher::new(library))
    }

    /// Build a client with explicit dispatcher configuration.
    pub fn with_config(library: Library, config: DispatcherConfig) -> Self {
        Self::from_dispatcher(Dispatcher::with_config(library, config))
    }

    /// Wrap an existing dispatcher.
    pub fn from_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        let runs = Runs::new(dispatcher.store().clone());
        Self { dispatcher, runs }
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The root of the library's path shape.
    pub fn root(&self) -> GroupRef<'_> {
        GroupRef::root(self)
    }

    /// Stop the dispatcher picking up new work.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Fire-and-forget typed trigger.
    pub async fn trigger<P, O>(
        &self,
        task: &TaskHandle<P, O>,
        payload: P,
        options: TriggerOptions,
    ) -> Result<TriggerHandle, ClientError>
    where
        P: Serialize,
    {
        debug!(task_id = %task.id(), "Triggering task");
        let payload =
            serde_json::to_value(payload).map_err(|e| ClientError::Serialization(e.to_string()))?;
        Ok(self.dispatcher.trigger(task.id(), payload, options).await?)
    }

    /// Typed trigger that waits for the run's terminal state.
    pub async fn trigger_and_wait<P, O>(
        &self,
        task: &TaskHandle<P, O>,
        payload: P,
        options: TriggerOptions,
    ) -> Result<TypedRunResult<O>, ClientError>
    where
        P: Serialize,
        O: DeserializeOwned,
    {
        debug!(task_id = %task.id(), "Triggering task and waiting");
        let payload =
            serde_json::to_value(payload).map_err(|e| ClientError::Serialization(e.to_string()))?;
        let result = self
            .dispatcher
            .trigger_and_wait(task.id(), payload, options)
            .await?;
        typed(result)
    }

    /// Typed trigger that waits, giving up after `timeout`. A timed-out wait
    /// yields the Failed variant with a Timeout error; the run is unaffected.
    pub async fn trigger_and_wait_timeout<P, O>(
        &self,
        task: &TaskHandle<P, O>,
        payload: P,
        options: TriggerOptions,
        timeout: Duration,
    ) -> Result<TypedRunResult<O>, ClientError>
    where
        P: Serialize,
        O: DeserializeOwned,
    {
        let payload =
            serde_json::to_value(payload).map_err(|e| ClientError::Serialization(e.to_string()))?;
        let result = self
            .dispatcher
            .trigger_and_wait_timeout(task.id(), payload, options, timeout)
            .await?;
        typed(result)
    }
}

fn typed<O: DeserializeOwned>(result: TaskRunResult) -> Result<TypedRunResult<O>, ClientError> {
    Ok(match result {
        TaskRunResult::Succeeded { id, output } => TypedRunResult::Succeeded {
            id,
            output: serde_json::from_value(output)
                .map_err(|e| ClientError::Serialization(e.to_string()))?,
        },
        TaskRunResult::Failed { id, error } => TypedRunResult::Failed { id, error },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use taskwire_core::{HandlerError, RunErrorKind, RunStatus, Task};

    #[derive(Debug, Serialize, Deserialize)]
    struct AddPayload {
        a: i64,
        b: i64,
    }

    fn add_client() -> (Client, TaskHandle<AddPayload, i64>) {
        let task: Task<AddPayload, i64> =
            Task::new("math/add", |ctx: taskwire_core::RunContext<AddPayload>| async move {
                Ok(ctx.payload.a + ctx.payload.b)
            });
        let handle = task.handle();
        let library = Library::builder()
            .group("math", |g| g.task("add", task.definition()))
            .build()
            .unwrap();
        (Client::new(library), handle)
    }

    #[tokio::test]
    async fn test_typed_trigger_and_wait() {
        let (client, add) = add_client();

        let result = client
            .trigger_and_wait(&add, AddPayload { a: 2, b: 3 }, TriggerOptions::new())
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(result.output(), Some(&5));
    }

    #[tokio::test]
    async fn test_typed_trigger_then_retrieve() {
        let (client, add) = add_client();

        let handle = client
            .trigger(&add, AddPayload { a: 1, b: 1 }, TriggerOptions::new())
            .await
            .unwrap();

        let result = client.dispatcher().wait(&handle.id).await.unwrap();
        assert!(result.is_ok());

        let summary = client.runs.retrieve(&handle.id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert_eq!(summary.output, Some(json!(2)));
        assert_eq!(summary.task_id.as_str(), "math/add");
    }

    #[tokio::test]
    async fn test_failed_run_reported_with_error() {
        let task: Task<Value, Value> =
            Task::new("fails", |_ctx| async move { Err(HandlerError::msg("nope")) });
        let handle = task.handle();
        let library = Library::builder().task("fails", task.definition()).build().unwrap();
        let client = Client::new(library);

        let result = client
            .trigger_and_wait(&handle, json!(null), TriggerOptions::new())
            .await
            .unwrap();
        assert!(!result.is_ok());
        let error = result.error().unwrap();
        assert_eq!(error.kind, RunErrorKind::Handler);
        assert_eq!(error.message, "nope");
    }
}
