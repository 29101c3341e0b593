//! The commit graph store: local commits, pull and reset.

use crate::change_feed::StoreEventKind;
use crate::changeset::{Changeset, Edge};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::graph::{CommitGraph, GraphReport};
use crate::id::ChangesetId;
use crate::queries;
use csync_codec::{ApplyReport, DeltaCapture};
use rusqlite::Connection;
use serde_json::Value as Meta;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    /// Value returned by the mutation.
    pub value: T,
    /// The node created, or `None` if the mutation changed nothing.
    pub changeset: Option<ChangesetId>,
}

/// Result of a pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Nodes applied.
    pub applied: usize,
    /// Operations omitted on conflict across all applied deltas.
    pub conflicts: usize,
    /// Head after the pull.
    pub head: Option<ChangesetId>,
}

/// Commit graph over a [`Database`].
///
/// The store is cheap to clone; clones share the database.
#[derive(Debug, Clone)]
pub struct ChangesetStore {
    db: Arc<Database>,
}

impl ChangesetStore {
    /// Creates a store over a database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Runs `mutation` with change capture and records what it changed.
    ///
    /// Returns the mutation's value. See [`Self::commit_detailed`].
    ///
    /// # Errors
    ///
    /// Returns the mutation's error, in which case nothing is written.
    pub fn commit<T, F>(&self, meta: Meta, mutation: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        Ok(self.commit_detailed(meta, mutation)?.value)
    }

    /// Runs `mutation` with change capture and records what it changed.
    ///
    /// Everything happens in one write transaction. If the captured delta is
    /// empty no node is created and head stays put. Otherwise a node is
    /// created with the current head as parent and head advances to it.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error, in which case nothing is written.
    pub fn commit_detailed<T, F>(&self, meta: Meta, mutation: F) -> CoreResult<Committed<T>>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        let committed = self.db.write(|tx| {
            let capture = DeltaCapture::start(tx)?;
            let value = mutation(tx)?;
            let delta = capture.finish()?;
            if delta.is_empty() {
                return Ok(Committed {
                    value,
                    changeset: None,
                });
            }

            let parent = queries::head(tx)?;
            let node = Changeset::new(parent, delta, meta);
            queries::insert(tx, &node)?;
            queries::set_head(tx, Some(node.id))?;
            tracing::debug!(
                id = %node.id,
                parent = ?parent.map(|p| p.short()),
                bytes = node.parent_delta.len(),
                "committed changeset"
            );
            Ok(Committed {
                value,
                changeset: Some(node.id),
            })
        })?;

        self.db.stats().record_commit(committed.changeset.is_some());
        if let Some(id) = committed.changeset {
            self.db.notify(StoreEventKind::Committed { id });
        }
        Ok(committed)
    }

    /// Applies children of head until none is left.
    ///
    /// Returns true if anything was applied.
    ///
    /// # Errors
    ///
    /// Fails if a stored delta cannot be applied; nothing is written then.
    pub fn pull(&self) -> CoreResult<bool> {
        Ok(self.pull_with_report()?.applied > 0)
    }

    /// Applies children of head until none is left, reporting details.
    ///
    /// A child is a node naming head on either edge; the delta of that edge
    /// is applied. With several children the lowest id wins. Runs in one
    /// write transaction and emits one event at the end.
    ///
    /// # Errors
    ///
    /// Fails if a stored delta cannot be applied; nothing is written then.
    pub fn pull_with_report(&self) -> CoreResult<PullReport> {
        let report = self.db.write(|tx| {
            let mut head = queries::head(tx)?;
            let mut applied = 0usize;
            let mut totals = ApplyReport::default();

            while let Some(node) = queries::next_child(tx, head)? {
                let (edge, delta) = match head {
                    Some(from) => node.delta_from(from).ok_or_else(|| {
                        CoreError::integrity(format!("{} is not a child of {from}", node.id))
                    })?,
                    None => (Edge::Parent, &node.parent_delta),
                };
                let report = delta.apply(tx)?;
                tracing::debug!(
                    id = %node.id,
                    edge = ?edge,
                    operations = report.operations,
                    conflicts = report.conflicts,
                    "applied changeset"
                );
                totals += report;
                head = Some(node.id);
                queries::set_head(tx, head)?;
                applied += 1;
            }

            Ok(PullReport {
                applied,
                conflicts: totals.conflicts,
                head,
            })
        })?;

        self.db.stats().record_pull(report.applied, report.conflicts);
        if let Some(head) = report.head.filter(|_| report.applied > 0) {
            tracing::info!(
                applied = report.applied,
                conflicts = report.conflicts,
                head = %head,
                "pulled"
            );
            self.db.notify(StoreEventKind::Pulled {
                head,
                applied: report.applied,
            });
        }
        Ok(report)
    }

    /// Clears head and deletes every node.
    ///
    /// Application tables are left as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is deleted then.
    pub fn reset(&self) -> CoreResult<()> {
        let deleted = self.db.write(|tx| queries::clear(tx))?;
        self.db.stats().record_reset();
        tracing::info!(deleted, "reset changeset history");
        self.db.notify(StoreEventKind::Reset);
        Ok(())
    }

    /// Inserts nodes created elsewhere, without applying them.
    ///
    /// The batch is ordered parents first. Every parent must exist locally
    /// or be part of the batch. Returns the number of nodes inserted.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for duplicates or missing parents; nothing
    /// is written then.
    pub fn insert(&self, nodes: Vec<Changeset>) -> CoreResult<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let count = self.db.write(|tx| insert_batch(tx, nodes))?;
        self.db.stats().record_insert(count);
        self.db.notify(StoreEventKind::Inserted { count });
        Ok(count)
    }

    /// Inserts nodes selected inside the write transaction.
    ///
    /// `select` runs first, in the same transaction, and returns the nodes
    /// to insert. Callers use it to move nodes out of their own staging
    /// tables atomically. Returns the ids of the inserted nodes.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or an integrity error from the batch;
    /// nothing is written then.
    pub fn insert_from<F>(&self, select: F) -> CoreResult<Vec<ChangesetId>>
    where
        F: FnOnce(&Connection) -> CoreResult<Vec<Changeset>>,
    {
        let ids = self.db.write(|tx| {
            let nodes = select(tx)?;
            let ids: Vec<ChangesetId> = nodes.iter().map(|node| node.id).collect();
            insert_batch(tx, nodes)?;
            Ok(ids)
        })?;
        if !ids.is_empty() {
            self.db.stats().record_insert(ids.len());
            self.db.notify(StoreEventKind::Inserted { count: ids.len() });
        }
        Ok(ids)
    }

    /// Current head.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn head(&self) -> CoreResult<Option<ChangesetId>> {
        self.db.read(queries::head)
    }

    /// One node.
    ///
    /// # Errors
    ///
    /// Returns a not found error if the node does not exist.
    pub fn get(&self, id: ChangesetId) -> CoreResult<Changeset> {
        self.db.read(|conn| queries::require(conn, id))
    }

    /// Returns true if the node exists.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn contains(&self, id: ChangesetId) -> CoreResult<bool> {
        self.db.read(|conn| queries::contains(conn, id))
    }

    /// All nodes in insertion order.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn changesets(&self) -> CoreResult<Vec<Changeset>> {
        self.db.read(queries::list)
    }

    /// Nodes not yet pushed, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn unpushed(&self) -> CoreResult<Vec<Changeset>> {
        self.db.read(queries::unpushed)
    }

    /// Flags a node as present remotely.
    ///
    /// # Errors
    ///
    /// Returns a not found error if the node does not exist.
    pub fn mark_pushed(&self, id: ChangesetId) -> CoreResult<()> {
        self.db.write(|tx| queries::mark_pushed(tx, id))
    }

    /// Snapshot of the graph's edges.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn commit_graph(&self) -> CoreResult<CommitGraph> {
        self.db.read(CommitGraph::load)
    }

    /// Nodes no other node references, ascending.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error.
    pub fn leaves(&self) -> CoreResult<Vec<ChangesetId>> {
        Ok(self.commit_graph()?.leaves())
    }

    /// Checks the graph and the head pointer.
    ///
    /// # Errors
    ///
    /// Returns a SQLite error; findings are reported, not raised.
    pub fn verify(&self) -> CoreResult<StoreReport> {
        self.db.read(|conn| {
            let graph = CommitGraph::load(conn)?;
            let head = queries::head(conn)?;
            let head_missing = head.is_some_and(|h| !graph.contains(h));
            let mut invalid = Vec::new();
            for node in queries::list(conn)? {
                if let Err(err) = node.validate() {
                    invalid.push((node.id, err.to_string()));
                }
            }
            Ok(StoreReport {
                graph: graph.verify(),
                head,
                head_missing,
                invalid,
            })
        })
    }
}

/// Findings of [`ChangesetStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Graph structure findings.
    pub graph: GraphReport,
    /// Current head.
    pub head: Option<ChangesetId>,
    /// Head names a node that does not exist.
    pub head_missing: bool,
    /// Nodes failing structural validation, with the reason.
    pub invalid: Vec<(ChangesetId, String)>,
}

impl StoreReport {
    /// Returns true if nothing is wrong.
    pub fn is_ok(&self) -> bool {
        self.graph.is_ok() && !self.head_missing && self.invalid.is_empty()
    }
}

/// Inserts a batch of nodes parents first inside an open transaction.
///
/// # Errors
///
/// Returns an integrity error for duplicate ids or parents that are neither
/// stored nor in the batch.
pub fn insert_batch(conn: &Connection, nodes: Vec<Changeset>) -> CoreResult<usize> {
    let mut known: HashSet<ChangesetId> = HashSet::new();
    for node in &nodes {
        if !known.insert(node.id) {
            return Err(CoreError::integrity(format!(
                "changeset {} appears twice in batch",
                node.id
            )));
        }
    }

    let mut remaining = nodes;
    let mut inserted = 0usize;
    let mut present: HashSet<ChangesetId> = HashSet::new();
    while !remaining.is_empty() {
        let before = remaining.len();
        let mut deferred = Vec::new();
        for node in remaining {
            let mut ready = true;
            for parent in node.parents() {
                if present.contains(&parent) {
                    continue;
                }
                if known.contains(&parent) {
                    ready = false;
                    break;
                }
                if !queries::contains(conn, parent)? {
                    return Err(CoreError::integrity(format!(
                        "parent {parent} of {} is unknown",
                        node.id
                    )));
                }
                present.insert(parent);
            }
            if ready {
                queries::insert(conn, &node)?;
                present.insert(node.id);
                inserted += 1;
            } else {
                deferred.push(node);
            }
        }
        if deferred.len() == before {
            return Err(CoreError::integrity("batch contains a parent cycle"));
        }
        remaining = deferred;
    }
    Ok(inserted)
}
