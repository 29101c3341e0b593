//! Engine schema.

use crate::error::CoreResult;
use crate::migration::MigrationManager;

/// Nodes and head pointer.
///
/// Parent references are deferred so that a batch of nodes may arrive in
/// any order and so that wiping history never trips a constraint
/// mid-transaction.
pub const ENGINE_SCHEMA: &str = "
CREATE TABLE csync_changeset (
    id           TEXT PRIMARY KEY NOT NULL,
    parent_id    TEXT REFERENCES csync_changeset (id) DEFERRABLE INITIALLY DEFERRED,
    parent_delta BLOB NOT NULL,
    merge_id     TEXT REFERENCES csync_changeset (id) DEFERRABLE INITIALLY DEFERRED,
    merge_delta  BLOB,
    pushed       INTEGER NOT NULL DEFAULT 0,
    meta         TEXT NOT NULL DEFAULT '{}',
    CHECK ((merge_id IS NULL) = (merge_delta IS NULL)),
    CHECK (parent_id IS NOT NULL OR merge_id IS NULL)
);
CREATE INDEX csync_changeset_parent ON csync_changeset (parent_id);
CREATE INDEX csync_changeset_merge ON csync_changeset (merge_id);
CREATE INDEX csync_changeset_pushed ON csync_changeset (pushed);

CREATE TABLE csync_head (
    singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
    id        TEXT REFERENCES csync_changeset (id) DEFERRABLE INITIALLY DEFERRED
);
INSERT INTO csync_head (singleton, id) VALUES (0, NULL);
";

/// Migrations installing the engine schema.
///
/// # Errors
///
/// Never fails in practice; registration only rejects duplicate names.
pub fn engine_migrations() -> CoreResult<MigrationManager> {
    let mut manager = MigrationManager::new();
    manager.register_sql("csync_engine_v1", ENGINE_SCHEMA)?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_installs_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = engine_migrations().unwrap();
        assert_eq!(manager.run_pending(&mut conn).unwrap().applied.len(), 1);
        assert!(manager.run_pending(&mut conn).unwrap().applied.is_empty());

        let heads: i64 = conn
            .query_row("SELECT count(*) FROM csync_head", [], |row| row.get(0))
            .unwrap();
        assert_eq!(heads, 1);
    }

    #[test]
    fn half_merge_rows_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        engine_migrations().unwrap().run_pending(&mut conn).unwrap();
        let result = conn.execute(
            "INSERT INTO csync_changeset (id, parent_id, parent_delta, merge_id)
             VALUES ('b', 'a', x'00', 'c')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn second_head_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        engine_migrations().unwrap().run_pending(&mut conn).unwrap();
        assert!(conn
            .execute("INSERT INTO csync_head (singleton, id) VALUES (1, NULL)", [])
            .is_err());
    }
}
