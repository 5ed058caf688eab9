//! Task definitions and the handler seam.
//!
//! A [`TaskDefinition`] binds an id, an optional payload parser, and a run
//! handler into an immutable descriptor owned by the library that contains
//! it. The typed layer ([`Task`]) wraps user closures over concrete payload
//! and output types, erasing them to JSON at the definition boundary and
//! handing back a [`TaskHandle`] so callers keep compile-time payload safety.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;
use crate::ids::{RunId, TaskId};
use crate::payload::PayloadParser;

/// Identifiers of the run a handler is executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    /// The run being executed.
    pub run: RunId,
    /// The task definition being executed.
    pub task: TaskId,
    /// Which execution attempt this is (1-based).
    pub attempt: u32,
}

/// Context handed to user task logic.
#[derive(Debug, Clone)]
pub struct RunContext<P> {
    /// Identifiers of the current run.
    pub meta: RunMeta,
    /// Middleware-injected context, configured on the dispatcher.
    pub ctx: Value,
    /// The parsed payload.
    pub payload: P,
}

/// The erased handler seam invoked by the dispatcher.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute one attempt of user logic.
    async fn call(&self, ctx: RunContext<Value>) -> Result<Value, HandlerError>;
}

type BoxedHandlerFn = Box<
    dyn Fn(RunContext<Value>) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>
        + Send
        + Sync,
>;

struct FnHandler {
    f: BoxedHandlerFn,
}

#[async_trait]
impl TaskHandler for FnHandler {
    async fn call(&self, ctx: RunContext<Value>) -> Result<Value, HandlerError> {
        (self.f)(ctx).await
    }
}

/// An immutable task descriptor: id, optional parser, handler.
#[derive(Clone)]
pub struct TaskDefinition {
    id: TaskId,
    parser: Option<PayloadParser>,
    handler: Arc<dyn TaskHandler>,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl TaskDefinition {
    /// Create a definition from an erased handler.
    pub fn new(id: impl Into<TaskId>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            id: id.into(),
            parser: None,
            handler,
        }
    }

    /// Builder method to attach a payload parser. Without one, payloads pass
    /// through unchanged.
    pub fn with_parser(mut self, parser: PayloadParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// The task's id.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// The attached payload parser, if any.
    pub fn parser(&self) -> Option<&PayloadParser> {
        self.parser.as_ref()
    }

    /// Invoke one attempt of the handler.
    pub async fn invoke(&self, ctx: RunContext<Value>) -> Result<Value, HandlerError> {
        self.handler.call(ctx).await
    }
}

/// Typed reference to a registered task.
///
/// Carries only the id and the payload/output types, so a client call site
/// cannot supply a payload shape the task does not accept.
pub struct TaskHandle<P, O> {
    id: TaskId,
    _marker: PhantomData<fn(P) -> O>,
}

impl<P, O> Clone for TaskHandle<P, O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<P, O> fmt::Debug for TaskHandle<P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.id).finish()
    }
}

impl<P, O> TaskHandle<P, O> {
    /// The referenced task's id.
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

/// A typed task: payload type `P`, output type `O`.
pub struct Task<P, O> {
    definition: TaskDefinition,
    _marker: PhantomData<fn(P) -> O>,
}

impl<P, O> Task<P, O>
where
    P: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    /// Define a task from an id and a typed handler closure.
    pub fn new<F, Fut>(id: impl Into<TaskId>, handler: F) -> Self
    where
        F: Fn(RunContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: BoxedHandlerFn = Box::new(move |ctx: RunContext<Value>| {
            let handler = handler.clone();
            Box::pin(async move {
                let RunContext { meta, ctx, payload } = ctx;
                let payload: P = serde_json::from_value(payload)?;
                let output = (handler.as_ref())(RunContext { meta, ctx, payload }).await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        Self {
            definition: TaskDefinition::new(id, Arc::new(FnHandler { f: erased })),
            _marker: PhantomData,
        }
    }

    /// Builder method to attach a payload parser.
    pub fn with_parser(mut self, parser: PayloadParser) -> Self {
        self.definition = self.definition.with_parser(parser);
        self
    }

    /// The task's id.
    pub fn id(&self) -> &TaskId {
        self.definition.id()
    }

    /// The erased definition, for library registration.
    pub fn definition(&self) -> TaskDefinition {
        self.definition.clone()
    }

    /// A typed handle for client call sites.
    pub fn handle(&self) -> TaskHandle<P, O> {
        TaskHandle {
            id: self.definition.id().clone(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn test_meta() -> RunMeta {
        RunMeta {
            run: RunId::generate(),
            task: TaskId::new("t"),
            attempt: 1,
        }
    }

    #[derive(Debug, Deserialize)]
    struct GreetPayload {
        name: String,
    }

    #[tokio::test]
    async fn test_typed_handler_round_trip() {
        let task: Task<GreetPayload, String> =
            Task::new("greet", |ctx: RunContext<GreetPayload>| async move {
                Ok(format!("hello {}", ctx.payload.name))
            });

        let def = task.definition();
        let out = def
            .invoke(RunContext {
                meta: test_meta(),
                ctx: Value::Null,
                payload: json!({ "name": "ada" }),
            })
            .await
            .unwrap();
        assert_eq!(out, json!("hello ada"));
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_bad_payload_shape() {
        let task: Task<GreetPayload, String> =
            Task::new("greet", |ctx: RunContext<GreetPayload>| async move {
                Ok(ctx.payload.name)
            });

        let err = task
            .definition()
            .invoke(RunContext {
                meta: test_meta(),
                ctx: Value::Null,
                payload: json!({ "nope": true }),
            })
            .await
            .unwrap_err();
        assert!(err.message().contains("serialization"));
    }

    #[tokio::test]
    async fn test_handler_failure_carries_message() {
        let task: Task<Value, Value> =
            Task::new("fails", |_ctx| async move { Err(HandlerError::msg("boom")) });

        let err = task
            .definition()
            .invoke(RunContext {
                meta: test_meta(),
                ctx: Value::Null,
                payload: json!(null),
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_handle_carries_id() {
        let task: Task<Value, Value> = Task::new("user/task-1", |ctx| async move { Ok(ctx.payload) });
        assert_eq!(task.handle().id().as_str(), "user/task-1");
    }
}
