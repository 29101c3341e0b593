//! Error types for the remote sync adapter.

use thiserror::Error;

/// Result type for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for record encoding and decoding.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// A record with this name exists with different content.
    #[error("record {record_name} already exists with different content")]
    Conflict {
        /// Name of the conflicting record.
        record_name: String,
    },

    /// The zone does not exist.
    #[error("zone {zone} not found")]
    ZoneNotFound {
        /// Zone name.
        zone: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Not connected.
    #[error("not connected to remote")]
    NotConnected,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { retryable, .. } => *retryable,
            RemoteError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true for a content conflict on save.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }
}

/// A remote record that could not be read as a changeset.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The body is not valid CBOR.
    #[error("invalid record body: {0}")]
    Cbor(String),

    /// A required field is absent.
    #[error("record field {0} is missing")]
    MissingField(&'static str),

    /// A field has the wrong type or an unusable value.
    #[error("record field {field} is invalid: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The body was written by an unknown format version.
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u64),

    /// The record name is not the id stored in the body.
    #[error("record {name} holds changeset {id}")]
    NameMismatch {
        /// Record name.
        name: String,
        /// Id found in the body.
        id: String,
    },

    /// The decoded node is malformed.
    #[error("invalid changeset: {0}")]
    Changeset(#[from] csync_core::CoreError),

    /// Meta is not valid JSON.
    #[error("invalid meta: {0}")]
    Meta(#[from] serde_json::Error),
}

impl RecordError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// Errors that can occur during push, fetch or setup.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The local store failed.
    #[error("local store error: {0}")]
    Core(#[from] csync_core::CoreError),

    /// A local node could not be turned into a record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }
}
