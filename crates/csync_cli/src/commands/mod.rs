//! CLI command implementations.

pub mod decode;
pub mod inspect;
pub mod log;
pub mod pull;
pub mod reset;
pub mod verify;

use csync_core::{ChangesetStore, Database};
use std::path::Path;
use std::sync::Arc;

/// Result type shared by all commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing database file as a changeset store.
pub fn open_store(path: &Path) -> CommandResult<ChangesetStore> {
    if !path.is_file() {
        return Err(format!("No database found at {}", path.display()).into());
    }
    let db = Database::open(path)?;
    Ok(ChangesetStore::new(Arc::new(db)))
}
