//! Error types for csync core.

use crate::id::ChangesetId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in commit graph operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A delta could not be decoded, combined or applied.
    #[error("codec error: {0}")]
    Codec(#[from] csync_codec::CodecError),

    /// The local SQLite store failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A referenced changeset does not exist.
    #[error("changeset not found: {id}")]
    NotFound {
        /// The missing changeset.
        id: ChangesetId,
    },

    /// A row the caller expected to modify does not exist.
    #[error("row not found in {table}: {key}")]
    RowNotFound {
        /// Table searched.
        table: String,
        /// Printable primary key.
        key: String,
    },

    /// A commit graph invariant would be violated.
    #[error("integrity error: {message}")]
    Integrity {
        /// Description of the violation.
        message: String,
    },

    /// Changeset metadata could not be serialized or parsed.
    #[error("meta error: {0}")]
    Meta(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration {name} failed: {message}")]
    Migration {
        /// Migration name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(id: ChangesetId) -> Self {
        Self::NotFound { id }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>, key: impl std::fmt::Display) -> Self {
        Self::RowNotFound {
            table: table.into(),
            key: key.to_string(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a migration error.
    pub fn migration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that mean a referenced node or row is absent.
    ///
    /// Callers usually recover from these by abandoning the edit.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. }
                | CoreError::RowNotFound { .. }
                | CoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
        )
    }
}
