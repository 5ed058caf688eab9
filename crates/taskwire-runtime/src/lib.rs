//! Taskwire Runtime
//!
//! The server side of the SDK: an immutable task library built once at
//! startup, an in-memory run store with forward-only status transitions, and
//! the dispatcher that validates payloads, creates runs, and executes
//! handlers with retry, delay, and concurrency-key serialization.

pub mod dispatcher;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig};
pub use registry::{Library, LibraryBuilder, LibraryNode, RegistryError};
pub use store::{CreateOutcome, RunCounts, RunStore, RunStoreConfig, StoreError};
