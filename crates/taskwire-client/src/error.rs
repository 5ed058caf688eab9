//! Client facade errors.

use thiserror::Error;

use taskwire_runtime::{DispatchError, StoreError};

/// Errors surfaced by the client facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Path navigation named a group that does not exist.
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// Path navigation named a task that does not exist at that path.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The dispatcher rejected the trigger (unknown id, invalid payload).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Run retrieval failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Payload or output (de)serialization failed at the typed boundary.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
