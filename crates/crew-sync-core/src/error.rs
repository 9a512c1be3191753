//! Error types for the sync engine.
//!
//! Routine offline behaviour never reaches callers as an error: the write
//! API reports a [`crate::engine::SyncOutcome`] instead. These variants cover
//! the seams below it (storage, compilation of queued writes, setup).

use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Refusing {kind} on {table} without any row predicate")]
    UnscopedWrite { table: String, kind: &'static str },

    #[error("No entity family registered for table: {0}")]
    UnknownFamily(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crew_sync_config::ConfigError),
}

impl SyncError {
    /// Whether replaying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Backend(_) | SyncError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
