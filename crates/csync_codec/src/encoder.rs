//! Encoder producing SQLite changeset bytes from typed operations.

use crate::decoder::TABLE_HEADER;
use crate::delta::Delta;
use crate::error::{CodecError, CodecResult};
use crate::operation::Operation;
use crate::value::Value;
use crate::varint;

/// Incremental changeset writer.
///
/// Consecutive operations on the same table share one table header.
#[derive(Debug, Default)]
pub struct ChangesetEncoder {
    buf: Vec<u8>,
    table: Option<(String, Vec<bool>)>,
    operations: usize,
}

impl ChangesetEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations written so far.
    pub fn operation_count(&self) -> usize {
        self.operations
    }

    /// Append one operation.
    ///
    /// # Errors
    ///
    /// Fails if the operation is structurally invalid: no columns, an empty
    /// table name, a record whose length differs from the column count, or
    /// an insert or delete carrying undefined values.
    pub fn push(&mut self, op: &Operation) -> CodecResult<()> {
        check_operation(op)?;

        let same_table = self
            .table
            .as_ref()
            .is_some_and(|(name, pk)| *name == op.table && *pk == op.primary_key);
        if !same_table {
            self.write_header(&op.table, &op.primary_key);
            self.table = Some((op.table.clone(), op.primary_key.clone()));
        }

        self.buf.push(op.kind.to_code());
        self.buf.push(u8::from(op.indirect));
        if op.kind.has_old_values() {
            write_record(&mut self.buf, &op.old_values);
        }
        if op.kind.has_new_values() {
            write_record(&mut self.buf, &op.new_values);
        }
        self.operations += 1;
        Ok(())
    }

    /// Consume the encoder and return the delta.
    pub fn finish(self) -> Delta {
        Delta::from_trusted(self.buf)
    }

    fn write_header(&mut self, table: &str, primary_key: &[bool]) {
        self.buf.push(TABLE_HEADER);
        varint::write(&mut self.buf, primary_key.len() as u64);
        self.buf.extend(primary_key.iter().map(|pk| u8::from(*pk)));
        self.buf.extend_from_slice(table.as_bytes());
        self.buf.push(0);
    }
}

/// Encode a sequence of operations into a delta.
///
/// # Errors
///
/// Returns the first invalid operation's error.
pub fn encode<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> CodecResult<Delta> {
    let mut encoder = ChangesetEncoder::new();
    for op in ops {
        encoder.push(op)?;
    }
    Ok(encoder.finish())
}

pub(crate) fn check_operation(op: &Operation) -> CodecResult<()> {
    if op.primary_key.is_empty() {
        return Err(CodecError::invalid_structure(format!(
            "table {} has no columns",
            op.table
        )));
    }
    if op.table.is_empty() || op.table.contains('\0') {
        return Err(CodecError::invalid_structure("invalid table name"));
    }

    let expected = op.column_count();
    let records = [
        (op.kind.has_old_values(), &op.old_values),
        (op.kind.has_new_values(), &op.new_values),
    ];
    for (present, values) in records {
        let wanted = if present { expected } else { 0 };
        if values.len() != wanted {
            return Err(CodecError::ColumnCountMismatch {
                table: op.table.clone(),
                expected: wanted,
                actual: values.len(),
            });
        }
    }

    if !op.kind.has_old_values() || !op.kind.has_new_values() {
        let full_row = if op.kind.has_new_values() {
            &op.new_values
        } else {
            &op.old_values
        };
        if full_row.iter().any(Value::is_undefined) {
            return Err(CodecError::invalid_structure(format!(
                "{} on {} has undefined column values",
                op.kind, op.table
            )));
        }
    }
    Ok(())
}

fn write_record(out: &mut Vec<u8>, values: &[Value]) {
    for value in values {
        out.push(value.tag());
        match value {
            Value::Undefined | Value::Null => {}
            Value::Integer(i) => out.extend_from_slice(&i.to_be_bytes()),
            Value::Real(r) => out.extend_from_slice(&r.to_be_bytes()),
            Value::Text(t) => {
                varint::write(out, t.len() as u64);
                out.extend_from_slice(t);
            }
            Value::Blob(b) => {
                varint::write(out, b.len() as u64);
                out.extend_from_slice(b);
            }
        }
    }
}
