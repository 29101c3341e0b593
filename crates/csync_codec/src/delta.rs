//! Owned delta buffer and the operations defined over it.

use crate::decoder::{decode_all, ChangesetDecoder};
use crate::error::CodecResult;
use crate::operation::Operation;
use rusqlite::session::{ChangesetItem, Changegroup, ConflictAction, ConflictType};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A binary changeset with value semantics.
///
/// The bytes are owned; cloning copies them. Deltas built through
/// [`Delta::from_bytes`] are validated, deltas produced by capture or
/// combination come straight from SQLite.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Delta(Vec<u8>);

/// Outcome of applying a delta to a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations contained in the delta.
    pub operations: usize,
    /// Operations omitted because the target row did not match.
    pub conflicts: usize,
}

impl ApplyReport {
    /// Returns true if every operation applied cleanly.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

impl std::ops::AddAssign for ApplyReport {
    fn add_assign(&mut self, other: Self) {
        self.operations += other.operations;
        self.conflicts += other.conflicts;
    }
}

impl Delta {
    /// The empty delta.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap bytes after checking that they decode.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a well-formed changeset.
    pub fn from_bytes(bytes: Vec<u8>) -> CodecResult<Self> {
        Self::validate_bytes(&bytes)?;
        Ok(Self(bytes))
    }

    pub(crate) fn from_trusted(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Check that `bytes` decode completely.
    ///
    /// # Errors
    ///
    /// Returns the first decoding error.
    pub fn validate_bytes(bytes: &[u8]) -> CodecResult<()> {
        for op in ChangesetDecoder::new(bytes) {
            op?;
        }
        Ok(())
    }

    /// Check that this delta decodes completely.
    ///
    /// # Errors
    ///
    /// Returns the first decoding error.
    pub fn validate(&self) -> CodecResult<()> {
        Self::validate_bytes(&self.0)
    }

    /// Returns true if the delta has no bytes, and so no operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Lazily decode the operations.
    pub fn operations(&self) -> ChangesetDecoder<'_> {
        ChangesetDecoder::new(&self.0)
    }

    /// Decode every operation.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the delta is malformed.
    pub fn decode(&self) -> CodecResult<Vec<Operation>> {
        decode_all(&self.0)
    }

    /// Combine deltas, oldest first, into one equivalent delta.
    ///
    /// Operations on the same row collapse: an insert followed by an update
    /// becomes a single insert, an insert followed by a delete disappears.
    ///
    /// # Errors
    ///
    /// Fails if an input is malformed or if two inputs disagree on a table's
    /// shape.
    pub fn combine<'a>(deltas: impl IntoIterator<Item = &'a Delta>) -> CodecResult<Delta> {
        let mut group = Changegroup::new()?;
        let mut inputs = 0usize;
        for delta in deltas {
            if delta.is_empty() {
                continue;
            }
            delta.validate()?;
            let mut input: &[u8] = &delta.0;
            group.add_stream(&mut input)?;
            inputs += 1;
        }
        if inputs == 0 {
            return Ok(Delta::empty());
        }

        let mut out = Vec::new();
        group.output_strm(&mut out)?;
        tracing::trace!(inputs, bytes = out.len(), "combined deltas");
        Ok(Delta(out))
    }

    /// Apply the delta to `conn`.
    ///
    /// An operation whose target row does not match the expected prior state
    /// is omitted and counted in [`ApplyReport::conflicts`]; the remaining
    /// operations still apply. Run this inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Fails if the delta is malformed or SQLite aborts the apply.
    pub fn apply(&self, conn: &Connection) -> CodecResult<ApplyReport> {
        let operations = self.operations().try_fold(0usize, |n, op| op.map(|_| n + 1))?;
        if operations == 0 {
            return Ok(ApplyReport::default());
        }

        let conflicts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&conflicts);
        let mut input: &[u8] = &self.0;
        conn.apply_strm(
            &mut input,
            None::<fn(&str) -> bool>,
            move |_kind: ConflictType, _item: ChangesetItem| {
                counter.fetch_add(1, Ordering::Relaxed);
                ConflictAction::SQLITE_CHANGESET_OMIT
            },
        )?;

        let report = ApplyReport {
            operations,
            conflicts: conflicts.load(Ordering::Relaxed),
        };
        if !report.is_clean() {
            tracing::warn!(
                operations = report.operations,
                conflicts = report.conflicts,
                "omitted conflicting operations while applying delta"
            );
        }
        Ok(report)
    }
}

impl fmt::Debug for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delta({} bytes)", self.0.len())
    }
}

impl AsRef<[u8]> for Delta {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ToSql for Delta {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for Delta {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_blob().map(|bytes| Delta(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DeltaCapture;
    use crate::encoder::encode;
    use crate::operation::OperationKind;
    use crate::value::Value;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE player (id TEXT PRIMARY KEY, name TEXT NOT NULL, score INTEGER NOT NULL);",
        )
        .unwrap();
        conn
    }

    fn capture(conn: &Connection, sql: &str) -> Delta {
        let capture = DeltaCapture::start(conn).unwrap();
        conn.execute_batch(sql).unwrap();
        capture.finish().unwrap()
    }

    fn rows(conn: &Connection) -> Vec<(String, String, i64)> {
        let mut stmt = conn
            .prepare("SELECT id, name, score FROM player ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn from_bytes_validates() {
        assert!(Delta::from_bytes(vec![b'T']).is_err());
        assert!(Delta::from_bytes(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn apply_replays_captured_changes() {
        let source = conn();
        let delta = capture(&source, "INSERT INTO player VALUES ('a', 'Ann', 1);");
        assert_eq!(delta.decode().unwrap()[0].kind, OperationKind::Insert);

        let target = conn();
        let report = delta.apply(&target).unwrap();
        assert_eq!(report, ApplyReport { operations: 1, conflicts: 0 });
        assert_eq!(rows(&target), vec![("a".into(), "Ann".into(), 1)]);
    }

    #[test]
    fn apply_omits_conflicts() {
        let source = conn();
        source
            .execute_batch("INSERT INTO player VALUES ('a', 'Ann', 1);")
            .unwrap();
        let update = capture(&source, "UPDATE player SET score = 2 WHERE id = 'a';");

        // Target never saw the row, so the update has nothing to match.
        let target = conn();
        let report = update.apply(&target).unwrap();
        assert_eq!(report.operations, 1);
        assert_eq!(report.conflicts, 1);
        assert!(rows(&target).is_empty());
    }

    #[test]
    fn combine_collapses_row_history() {
        let source = conn();
        let insert = capture(&source, "INSERT INTO player VALUES ('a', 'Ann', 1);");
        let update = capture(&source, "UPDATE player SET score = 5 WHERE id = 'a';");

        let combined = Delta::combine([&insert, &update]).unwrap();
        let ops = combined.decode().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Insert);
        assert_eq!(ops[0].new_values[2], Value::Integer(5));

        let delete = capture(&source, "DELETE FROM player WHERE id = 'a';");
        let gone = Delta::combine([&insert, &update, &delete]).unwrap();
        assert_eq!(gone.decode().unwrap().len(), 0);
    }

    #[test]
    fn combine_of_nothing_is_empty() {
        assert!(Delta::combine(std::iter::empty::<&Delta>()).unwrap().is_empty());
        assert!(Delta::combine([&Delta::empty()]).unwrap().is_empty());
    }

    #[test]
    fn combine_rejects_malformed_input() {
        let bad = Delta::from_trusted(vec![b'T', 1]);
        let err = Delta::combine([&bad]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn encoded_delta_applies() {
        let delta = encode(&[Operation::insert(
            "player",
            vec![true, false, false],
            vec![Value::from("z"), Value::from("Zed"), Value::Integer(9)],
        )])
        .unwrap();
        let target = conn();
        assert!(delta.apply(&target).unwrap().is_clean());
        assert_eq!(rows(&target), vec![("z".into(), "Zed".into(), 9)]);
    }

    #[test]
    fn sql_round_trip() {
        let conn = conn();
        let delta = capture(&conn, "INSERT INTO player VALUES ('a', 'Ann', 1);");
        let back: Delta = conn
            .query_row("SELECT ?1", [&delta], |row| row.get(0))
            .unwrap();
        assert_eq!(back, delta);
    }
}
