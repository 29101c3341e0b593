//! Row-level access to the engine tables.
//!
//! These functions take a plain connection so they compose inside any
//! write transaction opened through [`crate::Database::write`]. They do not
//! emit store events.

use crate::changeset::Changeset;
use crate::error::{CoreError, CoreResult};
use crate::id::ChangesetId;
use csync_codec::Delta;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, parent_id, parent_delta, merge_id, merge_delta, pushed, meta";

struct RawChangeset {
    id: ChangesetId,
    parent_id: Option<ChangesetId>,
    parent_delta: Delta,
    merge_id: Option<ChangesetId>,
    merge_delta: Option<Delta>,
    pushed: bool,
    meta: String,
}

impl RawChangeset {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            parent_delta: row.get(2)?,
            merge_id: row.get(3)?,
            merge_delta: row.get(4)?,
            pushed: row.get(5)?,
            meta: row.get(6)?,
        })
    }

    fn into_changeset(self) -> CoreResult<Changeset> {
        Ok(Changeset {
            id: self.id,
            parent_id: self.parent_id,
            parent_delta: self.parent_delta,
            merge_id: self.merge_id,
            merge_delta: self.merge_delta,
            pushed: self.pushed,
            meta: serde_json::from_str(&self.meta)?,
        })
    }
}

fn query_changesets(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> CoreResult<Vec<Changeset>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params, RawChangeset::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawChangeset::into_changeset).collect()
}

/// Current head, or `None` before the first commit.
pub fn head(conn: &Connection) -> CoreResult<Option<ChangesetId>> {
    let head = conn.query_row("SELECT id FROM csync_head WHERE singleton = 0", [], |row| {
        row.get(0)
    })?;
    Ok(head)
}

/// Moves the head pointer.
pub fn set_head(conn: &Connection, id: Option<ChangesetId>) -> CoreResult<()> {
    conn.execute("UPDATE csync_head SET id = ?1 WHERE singleton = 0", [id])?;
    Ok(())
}

/// Loads one node.
pub fn get(conn: &Connection, id: ChangesetId) -> CoreResult<Option<Changeset>> {
    let raw = conn
        .prepare_cached(&format!("SELECT {COLUMNS} FROM csync_changeset WHERE id = ?1"))?
        .query_row([id], RawChangeset::from_row)
        .optional()?;
    raw.map(RawChangeset::into_changeset).transpose()
}

/// Loads one node that must exist.
pub fn require(conn: &Connection, id: ChangesetId) -> CoreResult<Changeset> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found(id))
}

/// Returns true if a node with `id` exists.
pub fn contains(conn: &Connection, id: ChangesetId) -> CoreResult<bool> {
    let found = conn
        .prepare_cached("SELECT 1 FROM csync_changeset WHERE id = ?1")?
        .query_row([id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Number of nodes.
pub fn count(conn: &Connection) -> CoreResult<usize> {
    let n: i64 = conn.query_row("SELECT count(*) FROM csync_changeset", [], |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or_default())
}

/// Validates and inserts one node.
///
/// Parents are not checked here; the deferred foreign keys reject a
/// transaction that commits with a dangling reference.
pub fn insert(conn: &Connection, node: &Changeset) -> CoreResult<()> {
    node.validate()?;
    if contains(conn, node.id)? {
        return Err(CoreError::integrity(format!(
            "changeset {} already exists",
            node.id
        )));
    }
    let meta = serde_json::to_string(&node.meta)?;
    conn.prepare_cached(&format!(
        "INSERT INTO csync_changeset ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ))?
    .execute(params![
        node.id,
        node.parent_id,
        node.parent_delta,
        node.merge_id,
        node.merge_delta,
        node.pushed,
        meta,
    ])?;
    Ok(())
}

/// The next node to apply after `head`.
///
/// With a head, this is a node naming it on either edge. Without one it is a
/// root. Ties go to the lowest id.
pub fn next_child(conn: &Connection, head: Option<ChangesetId>) -> CoreResult<Option<Changeset>> {
    let mut found = match head {
        Some(head) => query_changesets(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM csync_changeset
                 WHERE parent_id = ?1 OR merge_id = ?1 ORDER BY id LIMIT 1"
            ),
            [head],
        )?,
        None => query_changesets(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM csync_changeset
                 WHERE parent_id IS NULL AND merge_id IS NULL ORDER BY id LIMIT 1"
            ),
            [],
        )?,
    };
    Ok(found.pop())
}

/// All nodes in insertion order.
pub fn list(conn: &Connection) -> CoreResult<Vec<Changeset>> {
    query_changesets(
        conn,
        &format!("SELECT {COLUMNS} FROM csync_changeset ORDER BY rowid"),
        [],
    )
}

/// Nodes not yet pushed, in insertion order.
pub fn unpushed(conn: &Connection) -> CoreResult<Vec<Changeset>> {
    query_changesets(
        conn,
        &format!("SELECT {COLUMNS} FROM csync_changeset WHERE pushed = 0 ORDER BY rowid"),
        [],
    )
}

/// Number of nodes not yet pushed.
pub fn unpushed_count(conn: &Connection) -> CoreResult<usize> {
    let n: i64 = conn.query_row(
        "SELECT count(*) FROM csync_changeset WHERE pushed = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or_default())
}

/// Flags a node as present remotely.
pub fn mark_pushed(conn: &Connection, id: ChangesetId) -> CoreResult<()> {
    let updated = conn
        .prepare_cached("UPDATE csync_changeset SET pushed = 1 WHERE id = ?1")?
        .execute([id])?;
    if updated == 0 {
        return Err(CoreError::not_found(id));
    }
    Ok(())
}

/// `(id, parent_id, merge_id)` of every node, for graph traversal.
pub fn edges(
    conn: &Connection,
) -> CoreResult<Vec<(ChangesetId, Option<ChangesetId>, Option<ChangesetId>)>> {
    let mut stmt = conn.prepare_cached("SELECT id, parent_id, merge_id FROM csync_changeset")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// `(parent_delta, meta)` of a node, without the merge columns.
pub fn parent_delta_and_meta(
    conn: &Connection,
    id: ChangesetId,
) -> CoreResult<(Delta, serde_json::Value)> {
    let (delta, meta): (Delta, String) = conn
        .prepare_cached("SELECT parent_delta, meta FROM csync_changeset WHERE id = ?1")?
        .query_row([id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?
        .ok_or_else(|| CoreError::not_found(id))?;
    Ok((delta, serde_json::from_str(&meta)?))
}

/// Deletes every node and clears the head.
///
/// Must run inside a transaction; references are checked at commit.
pub fn clear(conn: &Connection) -> CoreResult<usize> {
    conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
    set_head(conn, None)?;
    let deleted = conn.execute("DELETE FROM csync_changeset", [])?;
    Ok(deleted)
}
