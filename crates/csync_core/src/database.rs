//! Database handle.

use crate::change_feed::{ChangeFeed, StoreEvent, StoreEventKind};
use crate::config::Config;
use crate::error::CoreResult;
use crate::migration::{MigrationManager, MigrationRunResult};
use crate::schema::engine_migrations;
use crate::stats::StoreStats;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

/// The local store handle.
///
/// `Database` owns the single writer connection. Every mutation goes
/// through [`Database::write`], which serializes writers and runs the
/// closure in one `BEGIN IMMEDIATE` transaction. File databases also get a
/// read-only connection so readers see a consistent snapshot while a write
/// is in flight.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use csync_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("app.db"))?;
/// let head = db.read(|conn| csync_core::queries::head(conn))?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`:
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// ```
pub struct Database {
    config: Config,
    path: Option<PathBuf>,
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    feed: ChangeFeed,
    stats: StoreStats,
}

impl Database {
    /// Opens or creates a database file with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the engine schema
    /// cannot be installed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the engine schema
    /// cannot be installed.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let mut writer = Connection::open(path)?;
        configure(&writer, &config)?;
        if config.wal_mode {
            // journal_mode returns the resulting mode as a row.
            let mode: String =
                writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!(mode = %mode, "journal mode");
        }
        engine_migrations()?.run_pending(&mut writer)?;

        let reader = if config.reader_connection {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            reader.busy_timeout(config.busy_timeout)?;
            Some(Mutex::new(reader))
        } else {
            None
        };

        tracing::info!(path = %path.display(), "opened database");
        Ok(Self::assemble(config, Some(path.to_path_buf()), writer, reader))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine schema cannot be installed.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a private in-memory database with custom configuration.
    ///
    /// The reader setting is ignored: readers share the writer connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine schema cannot be installed.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        let mut writer = Connection::open_in_memory()?;
        configure(&writer, &config)?;
        engine_migrations()?.run_pending(&mut writer)?;
        Ok(Self::assemble(config, None, writer, None))
    }

    fn assemble(
        config: Config,
        path: Option<PathBuf>,
        writer: Connection,
        reader: Option<Mutex<Connection>>,
    ) -> Self {
        Self {
            feed: ChangeFeed::with_max_history(config.feed_history),
            stats: StoreStats::new(),
            config,
            path,
            writer: Mutex::new(writer),
            reader,
        }
    }

    /// Runs `f` in an immediate write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a SQLite error from begin or commit.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs `f` against a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a SQLite error.
    pub fn read<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        match &self.reader {
            Some(reader) => {
                let mut conn = reader.lock();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
                f(&tx)
            }
            None => {
                let conn = self.writer.lock();
                f(&conn)
            }
        }
    }

    /// Installs application or adapter tables.
    ///
    /// # Errors
    ///
    /// Returns a migration error naming the failed migration.
    pub fn migrate(&self, manager: &MigrationManager) -> CoreResult<MigrationRunResult> {
        let mut conn = self.writer.lock();
        manager.run_pending(&mut conn)
    }

    /// Subscribes to store events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    /// Emits a store event to subscribers.
    ///
    /// Call only after the transaction that caused it has committed.
    pub fn notify(&self, kind: StoreEventKind) -> StoreEvent {
        let event = self.feed.emit(kind);
        tracing::trace!(sequence = event.sequence, kind = ?event.kind, "store event");
        event
    }

    /// The change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Operation counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Database configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// File path, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn configure(conn: &Connection, config: &Config) -> CoreResult<()> {
    conn.busy_timeout(config.busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("reader", &self.reader.is_some())
            .field("events", &self.feed.latest_sequence())
            .finish_non_exhaustive()
    }
}
