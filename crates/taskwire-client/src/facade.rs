//! Path-shaped navigation over the library tree.
//!
//! Mirrors the nested registration shape: `client.root().group("billing")?
//! .task("invoice")?` reaches the same task that `buildLibrary` registered at
//! that path. Navigation is sugar over the display tree; triggering always
//! dispatches by the definition's full id.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use taskwire_core::{TaskId, TaskRunResult, TriggerHandle, TriggerOptions};
use taskwire_runtime::LibraryNode;

use crate::client::Client;
use crate::error::ClientError;

/// A group position in the library tree.
pub struct GroupRef<'a> {
    client: &'a Client,
    path: String,
    children: &'a BTreeMap<String, LibraryNode>,
}

impl<'a> GroupRef<'a> {
    pub(crate) fn root(client: &'a Client) -> Self {
        Self {
            client,
            path: String::new(),
            children: client.dispatcher().library().root(),
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        }
    }

    /// Names available directly under this group.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Descend into a nested group.
    pub fn group(&self, name: &str) -> Result<GroupRef<'a>, ClientError> {
        match self.children.get(name) {
            Some(LibraryNode::Group(children)) => Ok(GroupRef {
                client: self.client,
                path: self.child_path(name),
                children,
            }),
            _ => Err(ClientError::UnknownGroup(self.child_path(name))),
        }
    }

    /// Resolve a task leaf under this group.
    pub fn task(&self, name: &str) -> Result<TaskRef<'a>, ClientError> {
        match self.children.get(name) {
            Some(LibraryNode::Task(definition)) => Ok(TaskRef {
                client: self.client,
                id: definition.id().clone(),
            }),
            _ => Err(ClientError::UnknownTask(self.child_path(name))),
        }
    }
}

/// A task position in the library tree; triggers by the task's full id.
pub struct TaskRef<'a> {
    client: &'a Client,
    id: TaskId,
}

impl TaskRef<'_> {
    /// The task's dispatch id (full id, not the tree path).
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Fire-and-forget trigger with a raw JSON payload.
    pub async fn trigger(
        &self,
        payload: Value,
        options: TriggerOptions,
    ) -> Result<TriggerHandle, ClientError> {
        Ok(self
            .client
            .dispatcher()
            .trigger(&self.id, payload, options)
            .await?)
    }

    /// Trigger and wait for the run's terminal state.
    pub async fn trigger_and_wait(
        &self,
        payload: Value,
        options: TriggerOptions,
    ) -> Result<TaskRunResult, ClientError> {
        Ok(self
            .client
            .dispatcher()
            .trigger_and_wait(&self.id, payload, options)
            .await?)
    }

    /// Trigger and wait, giving up after `timeout`.
    pub async fn trigger_and_wait_timeout(
        &self,
        payload: Value,
        options: TriggerOptions,
        timeout: Duration,
    ) -> Result<TaskRunResult, ClientError> {
        Ok(self
            .client
            .dispatcher()
            .trigger_and_wait_timeout(&self.id, payload, options, timeout)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwire_core::Task;
    use taskwire_runtime::Library;

    fn nested_client() -> Client {
        let invoice: Task<Value, Value> =
            Task::new("billing/invoice", |ctx| async move { Ok(ctx.payload) });
        let monthly: Task<Value, Value> =
            Task::new("billing/reports-monthly", |ctx| async move { Ok(ctx.payload) });
        let echo: Task<Value, Value> = Task::new("echo", |ctx| async move { Ok(ctx.payload) });

        let library = Library::builder()
            .task("echo", echo.definition())
            .group("billing", |g| {
                g.task("invoice", invoice.definition())
                    .group("reports", |g| g.task("monthly", monthly.definition()))
            })
            .build()
            .unwrap();
        Client::new(library)
    }

    #[tokio::test]
    async fn test_path_navigation_reaches_nested_task() {
        let client = nested_client();

        let task = client
            .root()
            .group("billing")
            .unwrap()
            .group("reports")
            .unwrap()
            .task("monthly")
            .unwrap();
        assert_eq!(task.id().as_str(), "billing/reports-monthly");

        let result = task
            .trigger_and_wait(json!({ "month": "2026-08" }), TriggerOptions::new())
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(result.output(), Some(&json!({ "month": "2026-08" })));
    }

    #[tokio::test]
    async fn test_unknown_paths_rejected() {
        let client = nested_client();
        let root = client.root();

        assert!(matches!(
            root.group("nope"),
            Err(ClientError::UnknownGroup(path)) if path == "nope"
        ));
        // A task name is not a group, and vice versa.
        assert!(matches!(root.group("echo"), Err(ClientError::UnknownGroup(_))));
        assert!(matches!(
            root.task("billing"),
            Err(ClientError::UnknownTask(path)) if path == "billing"
        ));
        let billing = root.group("billing").unwrap();
        assert!(matches!(
            billing.task("refund"),
            Err(ClientError::UnknownTask(path)) if path == "billing.refund"
        ));
    }

    #[tokio::test]
    async fn test_root_names() {
        let client = nested_client();
        let root = client.root();
        let names: Vec<&str> = root.names().collect();
        assert_eq!(names, vec!["billing", "echo"]);
    }
}
