//! Column values carried by changeset records.

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use std::fmt;

/// Wire tags for column values in the changeset record format.
pub(crate) mod tag {
    pub const UNDEFINED: u8 = 0x00;
    pub const INTEGER: u8 = 0x01;
    pub const REAL: u8 = 0x02;
    pub const TEXT: u8 = 0x03;
    pub const BLOB: u8 = 0x04;
    pub const NULL: u8 = 0x05;
}

/// A single column value in a changeset record.
///
/// `Undefined` marks a column that is not part of the record: the new value
/// of an unchanged column in an UPDATE, or the old value of a non-key column
/// that an UPDATE did not touch.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Column not present in this record.
    Undefined,
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// IEEE 754 double.
    Real(f64),
    /// Text as stored by SQLite. Usually UTF-8, but SQLite keeps whatever
    /// bytes were written to a TEXT column and so does the changeset.
    Text(Vec<u8>),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true if the column is absent from the record.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text payload, if any and if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Returns the raw bytes of a text payload.
    pub fn as_text_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the blob payload, if any.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Value::Undefined => tag::UNDEFINED,
            Value::Null => tag::NULL,
            Value::Integer(_) => tag::INTEGER,
            Value::Real(_) => tag::REAL,
            Value::Text(_) => tag::TEXT,
            Value::Blob(_) => tag::BLOB,
        }
    }

    /// Converts to an owned SQLite value. `Undefined` has no SQL
    /// representation and yields `None`. Text that is not valid UTF-8 is
    /// replaced lossily; bind the value through `ToSql` to keep its bytes.
    pub fn to_sql_value(&self) -> Option<SqlValue> {
        match self {
            Value::Undefined => None,
            Value::Null => Some(SqlValue::Null),
            Value::Integer(n) => Some(SqlValue::Integer(*n)),
            Value::Real(f) => Some(SqlValue::Real(*f)),
            Value::Text(bytes) => Some(SqlValue::Text(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            Value::Blob(b) => Some(SqlValue::Blob(b.clone())),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(t.to_vec()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Undefined | Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(bytes) => ToSqlOutput::Borrowed(ValueRef::Text(bytes)),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "-"),
            Value::Null => write!(f, "NULL"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x}"),
            Value::Text(bytes) => write!(f, "'{}'", String::from_utf8_lossy(bytes)),
            Value::Blob(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "'")
            }
        }
    }
}
