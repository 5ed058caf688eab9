//! Taskwire Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network transports
//! - Storage backends
//! - Runtime specifics (beyond the async handler/parser seams)
//!
//! All types here represent the core business domain of Taskwire: tasks,
//! runs, trigger options, and the payload parser adapter.

pub mod error;
pub mod ids;
pub mod payload;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::HandlerError;
pub use ids::{RunId, TaskId};
pub use payload::{AssertSchema, ParseError, ParseSchema, PayloadParser, ValidateSchema};
pub use run::{Run, RunError, RunErrorKind, RunSummary, TaskRunResult, TriggerHandle, TriggerOptions};
pub use status::RunStatus;
pub use task::{RunContext, RunMeta, Task, TaskDefinition, TaskHandle, TaskHandler};
