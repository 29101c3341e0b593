//! Inspect command implementation.

use super::{open_store, CommandResult};
use csync_core::ChangesetId;
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Current head.
    pub head: Option<ChangesetId>,
    /// Number of changesets.
    pub changesets: usize,
    /// Number of merge changesets.
    pub merges: usize,
    /// Changesets not yet pushed.
    pub unpushed: usize,
    /// Changesets without parents.
    pub roots: Vec<ChangesetId>,
    /// Changesets without children.
    pub leaves: Vec<ChangesetId>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let nodes = store.changesets()?;
    let graph = store.commit_graph()?;

    let result = InspectResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path)?.len(),
        head: store.head()?,
        changesets: nodes.len(),
        merges: nodes.iter().filter(|n| n.is_merge()).count(),
        unpushed: nodes.iter().filter(|n| !n.pushed).count(),
        roots: graph.roots(),
        leaves: graph.leaves(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("csync Database Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!();
    println!("Graph:");
    println!(
        "  Head:       {}",
        result.head.map_or_else(|| "(none)".to_string(), |id| id.to_string())
    );
    println!("  Changesets: {}", result.changesets);
    println!("  Merges:     {}", result.merges);
    println!("  Unpushed:   {}", result.unpushed);
    println!("  Roots:      {}", result.roots.len());
    println!("  Leaves:     {}", result.leaves.len());

    if result.leaves.len() > 1 {
        println!();
        println!("Branches (run merge-all to join them):");
        for leaf in &result.leaves {
            let marker = if Some(*leaf) == result.head { " (head)" } else { "" };
            println!("  {leaf}{marker}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
