//! Verify command implementation.

use super::{open_store, CommandResult};
use csync_core::StoreReport;
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path) -> CommandResult {
    println!("Verifying database at {:?}", path);
    println!();

    let store = open_store(path)?;
    let report = store.verify()?;
    print_report(&report);

    println!();
    if report.is_ok() {
        println!("✓ Commit graph verification passed");
        Ok(())
    } else {
        println!("✗ Commit graph verification failed");
        Err("Verification failed".into())
    }
}

fn print_report(report: &StoreReport) {
    let graph = &report.graph;
    println!(
        "  {} changesets, {} roots, {} leaves",
        graph.nodes,
        graph.roots.len(),
        graph.leaves.len()
    );
    if report.head_missing {
        if let Some(head) = report.head {
            println!("    ERROR: head {head} does not exist");
        }
    }
    for (child, missing) in &graph.dangling {
        println!("    ERROR: {child} references missing {missing}");
    }
    for id in &graph.cyclic {
        println!("    ERROR: {id} is part of a cycle");
    }
    for (id, reason) in &report.invalid {
        println!("    ERROR: {id} is malformed: {reason}");
    }
}
