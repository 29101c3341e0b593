//! Change capture over a live connection.

use crate::delta::Delta;
use crate::error::CodecResult;
use rusqlite::session::Session;
use rusqlite::Connection;

/// Prefix of the engine's own bookkeeping tables.
///
/// Tables carrying this prefix are never captured, so recording a node or
/// moving the head does not leak into user deltas.
pub const INTERNAL_TABLE_PREFIX: &str = "csync_";

/// Returns true if changes to `table` belong in a user delta.
pub fn is_captured_table(table: &str) -> bool {
    !table.starts_with(INTERNAL_TABLE_PREFIX) && !table.starts_with("sqlite_")
}

/// Records every row change made through a connection until finished.
///
/// Only tables with a primary key are recorded.
pub struct DeltaCapture<'conn> {
    session: Session<'conn>,
}

impl<'conn> DeltaCapture<'conn> {
    /// Start recording changes on `conn`.
    ///
    /// # Errors
    ///
    /// Fails if SQLite cannot create or attach the session.
    pub fn start(conn: &'conn Connection) -> CodecResult<Self> {
        let mut session = Session::new(conn)?;
        session.table_filter(Some(|table: &str| is_captured_table(table)));
        session.attach(None)?;
        Ok(Self { session })
    }

    /// Returns true if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.session.is_empty()
    }

    /// Stop recording and return the captured delta.
    ///
    /// # Errors
    ///
    /// Fails if SQLite cannot produce the changeset.
    pub fn finish(mut self) -> CodecResult<Delta> {
        let mut out = Vec::new();
        self.session.changeset_strm(&mut out)?;
        tracing::trace!(bytes = out.len(), "captured delta");
        Ok(Delta::from_trusted(out))
    }
}
