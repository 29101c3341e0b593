//! Merge engine.
//!
//! A merge node joins two nodes `main` and `branch`. Its primary delta
//! replays what `branch` has that `main` lacks, its secondary delta replays
//! what `main` has that `branch` lacks. Pulling from either side therefore
//! reaches the same state, modulo operations omitted on conflict.

use crate::change_feed::StoreEventKind;
use crate::changeset::Changeset;
use crate::error::{CoreError, CoreResult};
use crate::graph::{CommitGraph, Edges};
use crate::id::ChangesetId;
use crate::queries;
use crate::store::ChangesetStore;
use csync_codec::Delta;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value as Meta;

/// Changes reachable from one node but not from another.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchDelta {
    /// Combined primary deltas, oldest first.
    pub delta: Delta,
    /// Meta of each contributing node, in the same order.
    pub meta: Vec<Meta>,
    /// Contributing nodes, ancestors before descendants.
    pub changesets: Vec<ChangesetId>,
}

/// Meta stored on a merge node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeMeta {
    /// Meta of the nodes folded into the primary delta.
    pub parent_meta: Vec<Meta>,
    /// Meta of the nodes folded into the secondary delta.
    pub merge_meta: Vec<Meta>,
}

impl MergeMeta {
    /// Reads merge meta back from a node, if it has that shape.
    pub fn from_meta(meta: &Meta) -> Option<Self> {
        serde_json::from_value(meta.clone()).ok()
    }
}

/// Collects the non-merge nodes reachable from `from` but not from
/// `excluding` and combines their primary deltas.
///
/// # Errors
///
/// Returns a codec error if the deltas cannot be combined.
pub fn branch_only_deltas(
    conn: &Connection,
    graph: &CommitGraph,
    from: ChangesetId,
    excluding: ChangesetId,
) -> CoreResult<BranchDelta> {
    let excluded = graph.ancestors(excluding);
    let changesets = graph.branch_only(from, &excluded);

    let mut deltas = Vec::with_capacity(changesets.len());
    let mut meta = Vec::with_capacity(changesets.len());
    for id in &changesets {
        let (delta, node_meta) = queries::parent_delta_and_meta(conn, *id)?;
        deltas.push(delta);
        meta.push(node_meta);
    }

    Ok(BranchDelta {
        delta: Delta::combine(&deltas)?,
        meta,
        changesets,
    })
}

/// Creates and inserts the merge node of `main` and `branch`.
///
/// `graph` is updated with the new node.
///
/// # Errors
///
/// Returns an integrity error if both ids are equal and a not found error if
/// either is unknown.
pub fn merge_in(
    conn: &Connection,
    graph: &mut CommitGraph,
    main: ChangesetId,
    branch: ChangesetId,
) -> CoreResult<Changeset> {
    if main == branch {
        return Err(CoreError::integrity(format!(
            "cannot merge {main} with itself"
        )));
    }
    for id in [main, branch] {
        if !graph.contains(id) {
            return Err(CoreError::not_found(id));
        }
    }

    let forward = branch_only_deltas(conn, graph, branch, main)?;
    let reverse = branch_only_deltas(conn, graph, main, branch)?;
    let meta = MergeMeta {
        parent_meta: forward.meta,
        merge_meta: reverse.meta,
    };

    let node = Changeset::merge(
        main,
        forward.delta,
        branch,
        reverse.delta,
        serde_json::to_value(&meta)?,
    );
    queries::insert(conn, &node)?;
    graph.add(
        node.id,
        Edges {
            parent: Some(main),
            merge: Some(branch),
        },
    );

    tracing::debug!(
        id = %node.id,
        main = %main,
        branch = %branch,
        forward = forward.changesets.len(),
        reverse = reverse.changesets.len(),
        "created merge node"
    );
    Ok(node)
}

impl ChangesetStore {
    /// Changes reachable from `from` but not from `excluding`.
    ///
    /// # Errors
    ///
    /// Returns a not found error if `from` is unknown.
    pub fn branch_only_deltas(
        &self,
        from: ChangesetId,
        excluding: ChangesetId,
    ) -> CoreResult<BranchDelta> {
        self.database().read(|conn| {
            let graph = CommitGraph::load(conn)?;
            if !graph.contains(from) {
                return Err(CoreError::not_found(from));
            }
            branch_only_deltas(conn, &graph, from, excluding)
        })
    }

    /// Creates a merge node joining `main` and `branch`.
    ///
    /// Head does not move; a later pull walks onto the merge node.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if both ids are equal and a not found error
    /// if either is unknown.
    pub fn merge(&self, main: ChangesetId, branch: ChangesetId) -> CoreResult<Changeset> {
        let node = self.database().write(|tx| {
            let mut graph = CommitGraph::load(tx)?;
            merge_in(tx, &mut graph, main, branch)
        })?;
        self.database().stats().record_merge();
        self.database()
            .notify(StoreEventKind::Merged { id: node.id });
        Ok(node)
    }

    /// Merges leaves pairwise until a single leaf remains.
    ///
    /// Each round merges the two lowest leaf ids, the lower one as main.
    /// Runs in one write transaction. Returns the merge nodes created, in
    /// creation order.
    ///
    /// # Errors
    ///
    /// Returns a codec error if deltas cannot be combined; nothing is
    /// written then.
    pub fn merge_all(&self) -> CoreResult<Vec<Changeset>> {
        let created = self.database().write(|tx| {
            let mut graph = CommitGraph::load(tx)?;
            let mut created = Vec::new();
            loop {
                let leaves = graph.leaves();
                let [main, branch, ..] = leaves.as_slice() else {
                    break;
                };
                created.push(merge_in(tx, &mut graph, *main, *branch)?);
            }
            Ok(created)
        })?;

        for _ in &created {
            self.database().stats().record_merge();
        }
        if let Some(last) = created.last() {
            tracing::info!(merges = created.len(), leaf = %last.id, "merged all leaves");
            self.database()
                .notify(StoreEventKind::Merged { id: last.id });
        }
        Ok(created)
    }
}
