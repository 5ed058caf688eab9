//! Taskwire client facade.
//!
//! A thin, statically-shaped proxy over a task library: typed
//! `trigger`/`trigger_and_wait` per registered task (via [`TaskHandle`]
//! phantom types), path navigation mirroring the library tree, and
//! `runs.retrieve` for run results. The facade performs no logic of its own
//! beyond forwarding to the dispatcher and run store.
//!
//! [`TaskHandle`]: taskwire_core::TaskHandle

pub mod client;
pub mod error;
pub mod facade;
pub mod runs;

pub use client::{Client, TypedRunResult};
pub use error::ClientError;
pub use facade::{GroupRef, TaskRef};
pub use runs::Runs;
