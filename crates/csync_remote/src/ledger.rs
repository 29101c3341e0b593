//! Sync bookkeeping persisted next to the commit graph.
//!
//! `csync_sync_state` holds the change token and the zone flag.
//! `csync_fetched` stages nodes fetched from the remote until their parents
//! are known locally. Both live in the same database as the graph, so a
//! fetched page and its token commit together.

use crate::remote::ChangeToken;
use csync_core::migration::MigrationManager;
use csync_core::{Changeset, ChangesetId, CoreResult, Delta};
use rusqlite::{params, Connection, OptionalExtension};

/// Tables of the sync ledger.
pub const LEDGER_SCHEMA: &str = "
CREATE TABLE csync_sync_state (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB
);

CREATE TABLE csync_fetched (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    parent_id TEXT,
    parent_delta BLOB NOT NULL,
    merge_id TEXT,
    merge_delta BLOB,
    meta TEXT NOT NULL
);
";

const CHANGE_TOKEN: &str = "change_token";
const ZONE_CREATED: &str = "zone_created";

/// Migrations installing the ledger tables.
pub fn ledger_migrations() -> CoreResult<MigrationManager> {
    let mut manager = MigrationManager::new();
    manager.register_sql("csync_sync_ledger_v1", LEDGER_SCHEMA)?;
    Ok(manager)
}

/// Last saved change token.
pub fn change_token(conn: &Connection) -> CoreResult<Option<ChangeToken>> {
    let token = conn
        .query_row(
            "SELECT value FROM csync_sync_state WHERE key = ?1",
            [CHANGE_TOKEN],
            |row| row.get::<_, Option<ChangeToken>>(0),
        )
        .optional()?;
    Ok(token.flatten())
}

/// Saves the change token, or forgets it with `None`.
pub fn set_change_token(conn: &Connection, token: Option<&ChangeToken>) -> CoreResult<()> {
    match token {
        Some(token) => conn.execute(
            "INSERT INTO csync_sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![CHANGE_TOKEN, token],
        )?,
        None => conn.execute("DELETE FROM csync_sync_state WHERE key = ?1", [CHANGE_TOKEN])?,
    };
    Ok(())
}

/// Whether the zone is known to exist remotely.
pub fn zone_created(conn: &Connection) -> CoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM csync_sync_state WHERE key = ?1",
            [ZONE_CREATED],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Remembers whether the zone exists remotely.
pub fn set_zone_created(conn: &Connection, created: bool) -> CoreResult<()> {
    if created {
        conn.execute(
            "INSERT OR IGNORE INTO csync_sync_state (key, value) VALUES (?1, NULL)",
            [ZONE_CREATED],
        )?;
    } else {
        conn.execute("DELETE FROM csync_sync_state WHERE key = ?1", [ZONE_CREATED])?;
    }
    Ok(())
}

/// Returns true if a node is staged.
pub fn is_staged(conn: &Connection, id: ChangesetId) -> CoreResult<bool> {
    let found = conn
        .prepare_cached("SELECT 1 FROM csync_fetched WHERE id = ?1")?
        .query_row([id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Stages a fetched node.
pub fn stage(conn: &Connection, node: &Changeset) -> CoreResult<()> {
    conn.prepare_cached(
        "INSERT INTO csync_fetched (id, parent_id, parent_delta, merge_id, merge_delta, meta)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        node.id,
        node.parent_id,
        node.parent_delta,
        node.merge_id,
        node.merge_delta,
        serde_json::to_string(&node.meta)?,
    ])?;
    Ok(())
}

type StagedRow = (
    ChangesetId,
    Option<ChangesetId>,
    Delta,
    Option<ChangesetId>,
    Option<Delta>,
    String,
);

/// Staged nodes in arrival order, flagged as pushed.
pub fn staged(conn: &Connection) -> CoreResult<Vec<Changeset>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, parent_id, parent_delta, merge_id, merge_delta, meta
         FROM csync_fetched ORDER BY seq",
    )?;
    let rows: Vec<StagedRow> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    rows.into_iter()
        .map(|(id, parent_id, parent_delta, merge_id, merge_delta, meta)| {
            Ok(Changeset {
                id,
                parent_id,
                parent_delta,
                merge_id,
                merge_delta,
                pushed: true,
                meta: serde_json::from_str(&meta)?,
            })
        })
        .collect()
}

/// Number of staged nodes.
pub fn staged_count(conn: &Connection) -> CoreResult<usize> {
    let n: i64 = conn.query_row("SELECT count(*) FROM csync_fetched", [], |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or_default())
}

/// Removes a node from staging.
pub fn unstage(conn: &Connection, id: ChangesetId) -> CoreResult<()> {
    conn.prepare_cached("DELETE FROM csync_fetched WHERE id = ?1")?
        .execute([id])?;
    Ok(())
}

/// Forgets the token, the zone flag and every staged node.
pub fn clear(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch("DELETE FROM csync_sync_state; DELETE FROM csync_fetched;")?;
    Ok(())
}
