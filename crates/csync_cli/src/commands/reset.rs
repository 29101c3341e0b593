//! Reset command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tracing::info;

/// Runs the reset command.
pub fn run(path: &Path, confirmed: bool) -> CommandResult {
    if !confirmed {
        return Err("Reset deletes every changeset; pass --yes to confirm".into());
    }
    let store = open_store(path)?;
    let count = store.changesets()?.len();
    info!("Resetting changeset history of {:?}", path);
    store.reset()?;
    println!("Deleted {count} changesets; application tables were left as they are");
    Ok(())
}
