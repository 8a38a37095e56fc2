//! Error types for duplex-sync.

use std::path::PathBuf;

use thiserror::Error;

use duplex_core::{ArtifactKey, ConfigError, ConflictId, ConflictStatus};

/// Failure reported by the remote collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RemoteError(pub String);

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Construction-time configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (state records).
    #[error("state store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored checksum moved between read and write.
    #[error("stale write for {key}: expected checksum {expected:?}, found {found:?}")]
    StaleWrite {
        key: ArtifactKey,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("conflict {0} not found")]
    ConflictNotFound(ConflictId),

    /// Resolution attempted on a conflict that is already resolved or ignored.
    #[error("conflict {id} is already {status:?}")]
    ConflictNotPending { id: ConflictId, status: ConflictStatus },

    #[error("manual resolution of conflict {0} requires resolved content")]
    MissingResolvedContent(ConflictId),

    #[error("remote apply failed after {attempts} attempt(s): {source}")]
    Remote {
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
