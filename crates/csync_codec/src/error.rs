//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding, combining or applying deltas.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of delta at byte {offset}")]
    UnexpectedEof {
        /// Offset at which more bytes were expected.
        offset: usize,
    },

    /// Unknown operation code in a change record.
    #[error("invalid operation code 0x{code:02x} at byte {offset}")]
    InvalidOpCode {
        /// The offending code.
        code: u8,
        /// Offset of the code.
        offset: usize,
    },

    /// Unknown value type tag.
    #[error("invalid value type 0x{code:02x} at byte {offset}")]
    InvalidValueType {
        /// The offending tag.
        code: u8,
        /// Offset of the tag.
        offset: usize,
    },

    /// Table name is not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// The buffer is a patchset, which carries no prior column values.
    #[error("patchsets are not supported")]
    PatchsetUnsupported,

    /// Invalid changeset structure.
    #[error("invalid changeset structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// An operation does not match its table's column count.
    #[error("operation on {table} has {actual} values, table has {expected} columns")]
    ColumnCountMismatch {
        /// Table name.
        table: String,
        /// Column count from the table header.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// SQLite rejected a combine, capture or apply request.
    #[error("sqlite engine error: {0}")]
    Engine(#[from] rusqlite::Error),
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Returns true if the error describes malformed delta bytes rather than
    /// an engine failure.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, CodecError::Engine(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_classification() {
        assert!(CodecError::UnexpectedEof { offset: 3 }.is_malformed());
        assert!(CodecError::PatchsetUnsupported.is_malformed());
        let engine = CodecError::Engine(rusqlite::Error::InvalidQuery);
        assert!(!engine.is_malformed());
    }

    #[test]
    fn error_display() {
        let err = CodecError::InvalidOpCode {
            code: 0x42,
            offset: 7,
        };
        assert_eq!(err.to_string(), "invalid operation code 0x42 at byte 7");

        let err = CodecError::ColumnCountMismatch {
            table: "player".into(),
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("player"));
    }
}
