//! Minimal end-to-end walkthrough: define tasks, build a library, trigger.
//!
//! Run with: `cargo run -p taskwire-client --example echo`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use taskwire_client::Client;
use taskwire_core::{HandlerError, RunContext, Task, TriggerOptions};
use taskwire_runtime::Library;

#[derive(Debug, Serialize, Deserialize)]
struct GreetPayload {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let echo: Task<Value, Value> = Task::new("echo", |ctx| async move { Ok(ctx.payload) });
    let greet: Task<GreetPayload, String> = Task::new("user/greet", |ctx: RunContext<GreetPayload>| async move {
        if ctx.payload.name.is_empty() {
            return Err(HandlerError::msg("name must not be empty"));
        }
        Ok(format!("hello {}", ctx.payload.name))
    });

    let echo_handle = echo.handle();
    let greet_handle = greet.handle();

    let library = Library::builder()
        .task("echo", echo.definition())
        .group("user", |g| g.task("greet", greet.definition()))
        .build()?;

    let client = Client::new(library);

    // Fire-and-forget, then poll the run.
    let handle = client
        .trigger(&echo_handle, json!({ "a": 1 }), TriggerOptions::new())
        .await?;
    info!(run_id = %handle.id, "Triggered echo");
    client.dispatcher().wait(&handle.id).await?;
    let summary = client.runs.retrieve(&handle.id).await?;
    info!(status = ?summary.status, output = ?summary.output, "Echo run finished");

    // Typed trigger-and-wait.
    let result = client
        .trigger_and_wait(
            &greet_handle,
            GreetPayload {
                name: "ada".to_string(),
            },
            TriggerOptions::new().with_idempotency_key("greet-ada"),
        )
        .await?;
    info!(run_id = %result.id(), output = ?result.output(), "Greet run finished");

    // Path-shaped access to the same task.
    let by_path = client.root().group("user")?.task("greet")?;
    let result = by_path
        .trigger_and_wait(json!({ "name": "grace" }), TriggerOptions::new())
        .await?;
    info!(ok = result.is_ok(), "Greet-by-path finished");

    client.shutdown();
    Ok(())
}
