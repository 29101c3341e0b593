//! Schema migration support.
//!
//! Migrations are named, ordered and forward-only. Each runs in its own
//! transaction and is recorded in `csync_migrations`, so running a manager
//! twice applies nothing the second time. The engine's own schema, the
//! sync ledger and application tables are all installed this way.
//!
//! ## Usage
//!
//! ```
//! use csync_core::migration::{MigrationManager, SqlMigration};
//! use csync_core::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! let mut manager = MigrationManager::new();
//! manager
//!     .register(Box::new(SqlMigration::new(
//!         "app_player",
//!         "CREATE TABLE player (id TEXT PRIMARY KEY, score INTEGER NOT NULL);",
//!     )))
//!     .unwrap();
//! let result = db.migrate(&manager).unwrap();
//! assert_eq!(result.applied, vec!["app_player".to_string()]);
//! ```

use crate::error::{CoreError, CoreResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::time::{SystemTime, UNIX_EPOCH};

const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS csync_migrations (
    name TEXT PRIMARY KEY NOT NULL,
    applied_at INTEGER NOT NULL
);";

/// Trait for defining migrations.
pub trait Migration: Send + Sync {
    /// Unique name; recorded once applied.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Runs the migration inside its transaction.
    fn up(&self, conn: &Connection) -> CoreResult<()>;
}

/// A migration consisting of a SQL batch.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    sql: String,
}

impl SqlMigration {
    /// Creates a migration from a name and a SQL batch.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(&self.sql)?;
        Ok(())
    }
}

/// A migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Migration name.
    pub name: String,
    /// Unix timestamp in milliseconds.
    pub applied_at: u64,
}

/// Result of running pending migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Names of the migrations applied by this run, in order.
    pub applied: Vec<String>,
    /// Number of registered migrations that were already applied.
    pub already_applied: usize,
}

/// An ordered set of migrations.
#[derive(Default)]
pub struct MigrationManager {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration after those already registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        if self.migrations.iter().any(|m| m.name() == migration.name()) {
            return Err(CoreError::migration(
                migration.name(),
                "already registered",
            ));
        }
        self.migrations.push(migration);
        Ok(())
    }

    /// Registers a SQL migration; convenience for [`Self::register`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register_sql(&mut self, name: &str, sql: &str) -> CoreResult<()> {
        self.register(Box::new(SqlMigration::new(name, sql)))
    }

    /// Names of the registered migrations, in order.
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    /// Lists migrations recorded in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeping table cannot be read.
    pub fn applied(conn: &Connection) -> CoreResult<Vec<AppliedMigration>> {
        conn.execute_batch(MIGRATIONS_TABLE)?;
        let mut stmt =
            conn.prepare("SELECT name, applied_at FROM csync_migrations ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(AppliedMigration {
                name: row.get(0)?,
                applied_at: row.get::<_, i64>(1)?.max(0) as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Names of registered migrations not yet applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeping table cannot be read.
    pub fn pending(&self, conn: &Connection) -> CoreResult<Vec<String>> {
        conn.execute_batch(MIGRATIONS_TABLE)?;
        let mut pending = Vec::new();
        for migration in &self.migrations {
            if !is_applied(conn, migration.name())? {
                pending.push(migration.name().to_string());
            }
        }
        Ok(pending)
    }

    /// Runs every pending migration, each in its own transaction.
    ///
    /// Stops at the first failure; migrations applied before it stay
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns a migration error naming the failed migration.
    pub fn run_pending(&self, conn: &mut Connection) -> CoreResult<MigrationRunResult> {
        conn.execute_batch(MIGRATIONS_TABLE)?;
        let mut result = MigrationRunResult::default();

        for migration in &self.migrations {
            let name = migration.name();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if is_applied(&tx, name)? {
                result.already_applied += 1;
                continue;
            }

            migration
                .up(&tx)
                .map_err(|err| CoreError::migration(name, err.to_string()))?;
            tx.execute(
                "INSERT INTO csync_migrations (name, applied_at) VALUES (?1, ?2)",
                params![name, now_millis()],
            )?;
            tx.commit()?;

            tracing::debug!(migration = name, "applied migration");
            result.applied.push(name.to_string());
        }
        Ok(result)
    }
}

fn is_applied(conn: &Connection, name: &str) -> CoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM csync_migrations WHERE name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
