//! Run retrieval surface.

use std::sync::Arc;

use tracing::debug;

use taskwire_core::{RunId, RunSummary};
use taskwire_runtime::{RunCounts, RunStore};

use crate::error::ClientError;

/// `runs.retrieve` and friends.
pub struct Runs {
    store: Arc<RunStore>,
}

impl Runs {
    pub(crate) fn new(store: Arc<RunStore>) -> Self {
        Self { store }
    }

    /// Retrieve a run's current summary by id.
    pub async fn retrieve(&self, id: &RunId) -> Result<RunSummary, ClientError> {
        debug!(run_id = %id, "Retrieving run");
        Ok(self.store.get(id).await?.summary())
    }

    /// Run counts by status.
    pub async fn counts(&self) -> RunCounts {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use serde_json::{json, Value};
    use taskwire_core::{Task, TriggerOptions};
    use taskwire_runtime::{Library, StoreError};

    #[tokio::test]
    async fn test_retrieve_missing_run() {
        let task: Task<Value, Value> = Task::new("echo", |ctx| async move { Ok(ctx.payload) });
        let library = Library::builder().task("echo", task.definition()).build().unwrap();
        let client = Client::new(library);

        let err = client.runs.retrieve(&RunId::new("missing")).await.unwrap_err();
        assert!(matches!(err, ClientError::Store(StoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_retrieve_reflects_terminal_state() {
        let task: Task<Value, Value> = Task::new("echo", |ctx| async move { Ok(ctx.payload) });
        let handle = task.handle();
        let library = Library::builder().task("echo", task.definition()).build().unwrap();
        let client = Client::new(library);

        let result = client
            .trigger_and_wait(&handle, json!({ "a": 1 }), TriggerOptions::new())
            .await
            .unwrap();

        let summary = client.runs.retrieve(result.id()).await.unwrap();
        assert!(summary.status.is_terminal());
        assert_eq!(summary.output, Some(json!({ "a": 1 })));
    }
}
