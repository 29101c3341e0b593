//! Pull and merge-all command implementations.

use super::{open_store, CommandResult};
use csync_core::ChangesetStore;
use std::path::Path;

/// Runs the pull command.
pub fn run(path: &Path) -> CommandResult {
    let store = open_store(path)?;
    pull(&store)
}

fn pull(store: &ChangesetStore) -> CommandResult {
    let report = store.pull_with_report()?;
    if report.applied == 0 {
        println!("Already at the newest changeset");
        return Ok(());
    }
    println!("Applied {} changesets", report.applied);
    if report.conflicts > 0 {
        println!("  {} conflicting operations omitted", report.conflicts);
    }
    if let Some(head) = report.head {
        println!("Head: {head}");
    }
    Ok(())
}

/// Runs the merge-all command.
pub fn merge_all(path: &Path, then_pull: bool) -> CommandResult {
    let store = open_store(path)?;
    let merges = store.merge_all()?;
    if merges.is_empty() {
        println!("Nothing to merge");
    } else {
        println!("Created {} merge changesets:", merges.len());
        for node in &merges {
            println!(
                "  {} joins {} and {}",
                node.id,
                node.parent_id.map(|id| id.short()).unwrap_or_default(),
                node.merge_id.map(|id| id.short()).unwrap_or_default()
            );
        }
    }

    if then_pull {
        pull(&store)?;
    } else if !merges.is_empty() {
        println!("Run pull to move head to the merged state");
    }
    Ok(())
}
