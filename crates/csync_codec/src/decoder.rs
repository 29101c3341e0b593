//! Lazy decoder for the SQLite changeset binary format.
//!
//! A changeset is a sequence of table blocks. Each block starts with a
//! header (`'T'`, column count, primary-key flags, table name) followed by
//! change records for that table. Records hold an operation code, an
//! indirect flag and one or two column records.

use crate::error::{CodecError, CodecResult};
use crate::operation::{Operation, OperationKind};
use crate::value::{tag, Value};
use crate::varint;

/// Marker byte of a changeset table header.
pub(crate) const TABLE_HEADER: u8 = b'T';

/// Marker byte of a patchset table header.
pub(crate) const PATCHSET_HEADER: u8 = b'P';

/// Upper bound on columns per table, matching SQLite's hard limit.
const MAX_COLUMNS: u64 = 32_767;

#[derive(Debug, Clone)]
struct TableHeader {
    name: String,
    primary_key: Vec<bool>,
}

/// Iterator over the operations of a delta.
///
/// Parsing is incremental: each call to `next` decodes one operation. After
/// the first error the iterator is fused and yields `None`.
pub struct ChangesetDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    table: Option<TableHeader>,
    failed: bool,
}

impl<'a> ChangesetDecoder<'a> {
    /// Create a new decoder over raw delta bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            table: None,
            failed: false,
        }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof {
                offset: self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_varint(&mut self) -> CodecResult<u64> {
        let (value, len) = varint::read(&self.data[self.pos..])
            .ok_or(CodecError::UnexpectedEof {
                offset: self.data.len(),
            })?;
        self.pos += len;
        Ok(value)
    }

    fn read_length(&mut self) -> CodecResult<usize> {
        let len = self.read_varint()?;
        usize::try_from(len).map_err(|_| CodecError::invalid_structure("length overflows usize"))
    }

    fn read_header(&mut self) -> CodecResult<TableHeader> {
        let columns = self.read_varint()?;
        if columns == 0 || columns > MAX_COLUMNS {
            return Err(CodecError::invalid_structure(format!(
                "table header declares {columns} columns"
            )));
        }
        // Bounded by MAX_COLUMNS above.
        #[allow(clippy::cast_possible_truncation)]
        let flags = self.read_slice(columns as usize)?;
        let primary_key: Vec<bool> = flags.iter().map(|flag| *flag != 0).collect();

        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::UnexpectedEof {
                offset: self.data.len(),
            })?;
        let name = std::str::from_utf8(&rest[..nul])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        self.pos += nul + 1;

        if name.is_empty() {
            return Err(CodecError::invalid_structure("empty table name"));
        }
        Ok(TableHeader { name, primary_key })
    }

    fn read_value(&mut self) -> CodecResult<Value> {
        let offset = self.pos;
        let code = self.read_byte()?;
        match code {
            tag::UNDEFINED => Ok(Value::Undefined),
            tag::NULL => Ok(Value::Null),
            tag::INTEGER => {
                let bytes = self.read_array()?;
                Ok(Value::Integer(i64::from_be_bytes(bytes)))
            }
            tag::REAL => {
                let bytes = self.read_array()?;
                Ok(Value::Real(f64::from_be_bytes(bytes)))
            }
            tag::TEXT => {
                let len = self.read_length()?;
                Ok(Value::Text(self.read_slice(len)?.to_vec()))
            }
            tag::BLOB => {
                let len = self.read_length()?;
                Ok(Value::Blob(self.read_slice(len)?.to_vec()))
            }
            code => Err(CodecError::InvalidValueType { code, offset }),
        }
    }

    fn read_array(&mut self) -> CodecResult<[u8; 8]> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.read_slice(8)?);
        Ok(out)
    }

    fn read_record(&mut self, columns: usize) -> CodecResult<Vec<Value>> {
        (0..columns).map(|_| self.read_value()).collect()
    }

    fn read_operation(&mut self) -> CodecResult<Operation> {
        let offset = self.pos;
        let code = self.read_byte()?;
        let kind = OperationKind::from_code(code).ok_or(CodecError::InvalidOpCode { code, offset })?;
        let indirect = self.read_byte()? != 0;

        let table = self
            .table
            .clone()
            .ok_or_else(|| CodecError::invalid_structure("change record before table header"))?;
        let columns = table.primary_key.len();

        let old_values = if kind.has_old_values() {
            self.read_record(columns)?
        } else {
            Vec::new()
        };
        let new_values = if kind.has_new_values() {
            self.read_record(columns)?
        } else {
            Vec::new()
        };

        Ok(Operation {
            kind,
            table: table.name,
            primary_key: table.primary_key,
            indirect,
            old_values,
            new_values,
        })
    }

    fn next_operation(&mut self) -> CodecResult<Option<Operation>> {
        loop {
            let Some(&marker) = self.data.get(self.pos) else {
                return Ok(None);
            };
            match marker {
                TABLE_HEADER => {
                    self.pos += 1;
                    self.table = Some(self.read_header()?);
                }
                PATCHSET_HEADER => return Err(CodecError::PatchsetUnsupported),
                _ => return self.read_operation().map(Some),
            }
        }
    }
}

impl Iterator for ChangesetDecoder<'_> {
    type Item = CodecResult<Operation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_operation() {
            Ok(op) => op.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode every operation in `data`.
///
/// # Errors
///
/// Returns the first decoding error encountered.
pub fn decode_all(data: &[u8]) -> CodecResult<Vec<Operation>> {
    ChangesetDecoder::new(data).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // INSERT INTO player VALUES ('p1', 7) on table player(id PK, score).
    fn insert_bytes() -> Vec<u8> {
        let mut out = vec![TABLE_HEADER, 2, 1, 0];
        out.extend_from_slice(b"player\0");
        out.extend_from_slice(&[18, 0]);
        out.extend_from_slice(&[tag::TEXT, 2, b'p', b'1']);
        out.push(tag::INTEGER);
        out.extend_from_slice(&7i64.to_be_bytes());
        out
    }

    #[test]
    fn decode_insert() {
        let ops = decode_all(&insert_bytes()).unwrap();
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.kind, OperationKind::Insert);
        assert_eq!(op.table, "player");
        assert_eq!(op.primary_key, vec![true, false]);
        assert_eq!(op.new_values, vec![Value::from("p1"), Value::Integer(7)]);
        assert!(op.old_values.is_empty());
    }

    #[test]
    fn text_keeps_raw_bytes() {
        let mut bytes = insert_bytes();
        let text_offset = 1 + 1 + 2 + b"player\0".len() + 2;
        assert_eq!(bytes[text_offset], tag::TEXT);
        bytes[text_offset + 2] = 0xff;
        bytes[text_offset + 3] = 0x00;

        let ops = decode_all(&bytes).unwrap();
        assert_eq!(ops[0].new_values[0], Value::Text(vec![0xff, 0x00]));
    }

    #[test]
    fn empty_input_has_no_operations() {
        assert!(decode_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_record_is_eof() {
        let bytes = insert_bytes();
        let err = decode_all(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { .. }));
    }

    #[test]
    fn bad_op_code() {
        let mut bytes = insert_bytes();
        let op_offset = 1 + 1 + 2 + b"player\0".len();
        bytes[op_offset] = 0x42;
        let err = decode_all(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidOpCode { code: 0x42, offset } if offset == op_offset
        ));
    }

    #[test]
    fn bad_value_type() {
        let mut bytes = insert_bytes();
        let value_offset = 1 + 1 + 2 + b"player\0".len() + 2;
        bytes[value_offset] = 9;
        let err = decode_all(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValueType { code: 9, .. }));
    }

    #[test]
    fn record_before_header() {
        let err = decode_all(&[18, 0, tag::NULL]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStructure { .. }));
    }

    #[test]
    fn patchset_rejected() {
        let mut bytes = insert_bytes();
        bytes[0] = PATCHSET_HEADER;
        assert!(matches!(
            decode_all(&bytes).unwrap_err(),
            CodecError::PatchsetUnsupported
        ));
    }

    #[test]
    fn iterator_fuses_after_error() {
        let mut decoder = ChangesetDecoder::new(&[0x42, 0]);
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.next().is_none());
    }
}
