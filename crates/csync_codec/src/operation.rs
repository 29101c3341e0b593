//! Typed row operations decoded from a delta.

use crate::value::Value;
use std::fmt;

/// SQLite authorizer codes used as operation tags on the wire.
pub(crate) mod code {
    pub const DELETE: u8 = 9;
    pub const INSERT: u8 = 18;
    pub const UPDATE: u8 = 23;
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl OperationKind {
    /// Converts to the wire code.
    pub fn to_code(self) -> u8 {
        match self {
            OperationKind::Insert => code::INSERT,
            OperationKind::Update => code::UPDATE,
            OperationKind::Delete => code::DELETE,
        }
    }

    /// Converts from the wire code.
    pub fn from_code(value: u8) -> Option<Self> {
        match value {
            code::INSERT => Some(OperationKind::Insert),
            code::UPDATE => Some(OperationKind::Update),
            code::DELETE => Some(OperationKind::Delete),
            _ => None,
        }
    }

    /// Returns true if records of this kind carry prior column values.
    pub fn has_old_values(self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Delete)
    }

    /// Returns true if records of this kind carry new column values.
    pub fn has_new_values(self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "INSERT"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single row operation.
///
/// `old_values` is empty for inserts and `new_values` is empty for deletes.
/// Otherwise both hold one entry per table column, with
/// [`Value::Undefined`] for columns an update left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Kind of change.
    pub kind: OperationKind,
    /// Target table.
    pub table: String,
    /// Primary-key membership per column.
    pub primary_key: Vec<bool>,
    /// Whether the change was made indirectly (by a trigger or FK action).
    pub indirect: bool,
    /// Prior column values.
    pub old_values: Vec<Value>,
    /// New column values.
    pub new_values: Vec<Value>,
}

impl Operation {
    /// Creates an insert of a full row.
    pub fn insert(table: impl Into<String>, primary_key: Vec<bool>, row: Vec<Value>) -> Self {
        Self {
            kind: OperationKind::Insert,
            table: table.into(),
            primary_key,
            indirect: false,
            old_values: Vec::new(),
            new_values: row,
        }
    }

    /// Creates an update from prior and new column values.
    pub fn update(
        table: impl Into<String>,
        primary_key: Vec<bool>,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            table: table.into(),
            primary_key,
            indirect: false,
            old_values,
            new_values,
        }
    }

    /// Creates a delete of a full prior row.
    pub fn delete(table: impl Into<String>, primary_key: Vec<bool>, row: Vec<Value>) -> Self {
        Self {
            kind: OperationKind::Delete,
            table: table.into(),
            primary_key,
            indirect: false,
            old_values: row,
            new_values: Vec::new(),
        }
    }

    /// Number of columns in the target table.
    pub fn column_count(&self) -> usize {
        self.primary_key.len()
    }

    /// Returns the primary-key values identifying the affected row.
    pub fn key(&self) -> Vec<&Value> {
        let source = if self.kind == OperationKind::Insert {
            &self.new_values
        } else {
            &self.old_values
        };
        source
            .iter()
            .zip(&self.primary_key)
            .filter(|(_, is_pk)| **is_pk)
            .map(|(value, _)| value)
            .collect()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.table)?;
        let join = |values: &[Value]| {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        if self.kind.has_old_values() {
            write!(f, " old=({})", join(&self.old_values))?;
        }
        if self.kind.has_new_values() {
            write!(f, " new=({})", join(&self.new_values))?;
        }
        Ok(())
    }
}
