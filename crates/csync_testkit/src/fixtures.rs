//! Test fixtures and device helpers.
//!
//! A [`TestDevice`] is one replica: a database with the `player` table and
//! a [`ChangesetStore`] on top. Every helper commits through the store, so
//! each successful edit becomes one changeset.

use csync_core::{ChangesetId, ChangesetStore, Config, CoreError, CoreResult, Database};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Application table used by tests.
pub const PLAYER_SCHEMA: &str =
    "CREATE TABLE player (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, score INTEGER NOT NULL);";

/// A row of the `player` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Player {
    /// Primary key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Score.
    pub score: i64,
}

impl Player {
    /// Creates a player.
    pub fn new(id: impl Into<String>, name: impl Into<String>, score: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score,
        }
    }
}

/// One replica with automatic cleanup.
pub struct TestDevice {
    /// Name used in assertion messages.
    pub name: String,
    store: ChangesetStore,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDevice {
    /// Creates a device backed by an in-memory database.
    pub fn memory(name: impl Into<String>) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        Self::with_database(name, db, None)
    }

    /// Creates a device backed by a database file in a temporary directory.
    pub fn file(name: impl Into<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(&temp_dir.path().join("device.db"), Config::default())
            .expect("Failed to open file database");
        Self::with_database(name, db, Some(temp_dir))
    }

    fn with_database(name: impl Into<String>, db: Database, temp_dir: Option<TempDir>) -> Self {
        db.write(|tx| {
            tx.execute_batch(PLAYER_SCHEMA)?;
            Ok(())
        })
        .expect("Failed to create player table");
        Self {
            name: name.into(),
            store: ChangesetStore::new(Arc::new(db)),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.store.database().path().map(PathBuf::from)
    }

    /// The changeset store.
    pub fn store(&self) -> &ChangesetStore {
        &self.store
    }

    /// The database handle.
    pub fn database(&self) -> &Arc<Database> {
        self.store.database()
    }

    /// Inserts a player. Returns the new changeset.
    pub fn add_player(&self, id: &str, name: &str, score: i64) -> ChangesetId {
        self.store
            .commit_detailed(json!({"op": "add", "id": id}), |conn| {
                conn.execute(
                    "INSERT INTO player (id, name, score) VALUES (?1, ?2, ?3)",
                    params![id, name, score],
                )?;
                Ok(())
            })
            .expect("Failed to add player")
            .changeset
            .expect("Adding a player always changes a row")
    }

    /// Sets a player's score.
    ///
    /// Returns `Ok(None)` if the score already had that value, and a row
    /// not found error if the player does not exist here.
    pub fn set_score(&self, id: &str, score: i64) -> CoreResult<Option<ChangesetId>> {
        let committed = self
            .store
            .commit_detailed(json!({"op": "score", "id": id}), |conn| {
                require_player(conn, id)?;
                conn.execute(
                    "UPDATE player SET score = ?2 WHERE id = ?1 AND score != ?2",
                    params![id, score],
                )?;
                Ok(())
            })?;
        Ok(committed.changeset)
    }

    /// Renames a player.
    pub fn rename(&self, id: &str, name: &str) -> CoreResult<Option<ChangesetId>> {
        let committed = self
            .store
            .commit_detailed(json!({"op": "rename", "id": id}), |conn| {
                require_player(conn, id)?;
                conn.execute(
                    "UPDATE player SET name = ?2 WHERE id = ?1 AND name != ?2",
                    params![id, name],
                )?;
                Ok(())
            })?;
        Ok(committed.changeset)
    }

    /// Deletes a player.
    pub fn remove_player(&self, id: &str) -> CoreResult<Option<ChangesetId>> {
        let committed = self
            .store
            .commit_detailed(json!({"op": "remove", "id": id}), |conn| {
                require_player(conn, id)?;
                conn.execute("DELETE FROM player WHERE id = ?1", [id])?;
                Ok(())
            })?;
        Ok(committed.changeset)
    }

    /// A single player.
    pub fn player(&self, id: &str) -> Option<Player> {
        self.database()
            .read(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, score FROM player WHERE id = ?1",
                        [id],
                        |row| Ok(Player::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .expect("Failed to read player")
    }

    /// Every player, ordered by id.
    pub fn players(&self) -> Vec<Player> {
        self.database()
            .read(|conn| {
                let mut stmt = conn.prepare("SELECT id, name, score FROM player ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Player::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .expect("Failed to list players")
    }

    /// Current head.
    pub fn head(&self) -> Option<ChangesetId> {
        self.store.head().expect("Failed to read head")
    }

    /// Copies every node this device lacks from `other`. Returns the number
    /// inserted.
    pub fn receive_from(&self, other: &TestDevice) -> usize {
        let missing: Vec<_> = other
            .store
            .changesets()
            .expect("Failed to list changesets")
            .into_iter()
            .filter(|node| !self.store.contains(node.id).expect("Failed to look up changeset"))
            .collect();
        self.store.insert(missing).expect("Failed to insert changesets")
    }
}

impl std::fmt::Debug for TestDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDevice").field("name", &self.name).finish()
    }
}

fn require_player(conn: &Connection, id: &str) -> CoreResult<()> {
    let found = conn
        .query_row("SELECT 1 FROM player WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    found.ok_or_else(|| CoreError::row_not_found("player", id))
}

/// Runs a test with a temporary in-memory device.
pub fn with_device<F, R>(f: F) -> R
where
    F: FnOnce(&TestDevice) -> R,
{
    let device = TestDevice::memory("device");
    f(&device)
}
