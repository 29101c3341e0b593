//! Log command implementation.

use super::{open_store, CommandResult};
use csync_core::{Changeset, ChangesetId};
use serde::Serialize;
use std::path::Path;

/// One changeset for output.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    /// Changeset id.
    pub id: ChangesetId,
    /// Parent edge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ChangesetId>,
    /// Merge edge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<ChangesetId>,
    /// Size of the parent delta in bytes.
    pub parent_delta_size: usize,
    /// Size of the merge delta in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_delta_size: Option<usize>,
    /// Whether the changeset exists remotely.
    pub pushed: bool,
    /// Whether this is the current head.
    pub head: bool,
    /// Application meta.
    pub meta: serde_json::Value,
}

impl LogEntry {
    fn new(node: Changeset, head: Option<ChangesetId>) -> Self {
        Self {
            id: node.id,
            parent: node.parent_id,
            merge: node.merge_id,
            parent_delta_size: node.parent_delta.len(),
            merge_delta_size: node.merge_delta.as_ref().map(|d| d.len()),
            pushed: node.pushed,
            head: Some(node.id) == head,
            meta: node.meta,
        }
    }
}

/// Runs the log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let head = store.head()?;
    let entries: Vec<LogEntry> = store
        .changesets()?
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|node| LogEntry::new(node, head))
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn short(id: Option<ChangesetId>) -> String {
    id.map_or_else(|| "-".repeat(8), |id| id.short())
}

fn print_text_output(entries: &[LogEntry]) {
    println!(
        "{:<8}  {:<8}  {:<8}  {:>8}  {:<6}  META",
        "ID", "PARENT", "MERGE", "BYTES", "PUSHED"
    );
    for entry in entries {
        let bytes = entry.parent_delta_size + entry.merge_delta_size.unwrap_or(0);
        println!(
            "{:<8}  {:<8}  {:<8}  {:>8}  {:<6}  {}{}",
            entry.id.short(),
            short(entry.parent),
            short(entry.merge),
            bytes,
            if entry.pushed { "yes" } else { "no" },
            entry.meta,
            if entry.head { "  <- head" } else { "" }
        );
    }
    println!();
    println!("{} changesets", entries.len());
}
