//! In-memory view of the commit graph.
//!
//! Ancestry questions are answered by explicit traversal over a snapshot of
//! node edges, never by recursive SQL.

use crate::error::CoreResult;
use crate::id::ChangesetId;
use crate::queries;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Parent references of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    /// Primary parent.
    pub parent: Option<ChangesetId>,
    /// Secondary parent of a merge node.
    pub merge: Option<ChangesetId>,
}

impl Edges {
    fn iter(self) -> impl Iterator<Item = ChangesetId> {
        self.parent.into_iter().chain(self.merge)
    }
}

/// Snapshot of node ids and their parent edges.
#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    nodes: BTreeMap<ChangesetId, Edges>,
}

/// Findings of [`CommitGraph::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphReport {
    /// Number of nodes.
    pub nodes: usize,
    /// Nodes without parents.
    pub roots: Vec<ChangesetId>,
    /// Nodes no other node references.
    pub leaves: Vec<ChangesetId>,
    /// `(node, missing parent)` pairs.
    pub dangling: Vec<(ChangesetId, ChangesetId)>,
    /// Nodes on or behind a cycle.
    pub cyclic: Vec<ChangesetId>,
}

impl GraphReport {
    /// Returns true if the graph is a well-formed DAG.
    pub fn is_ok(&self) -> bool {
        self.dangling.is_empty() && self.cyclic.is_empty()
    }
}

impl CommitGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the edges of every persisted node.
    pub fn load(conn: &Connection) -> CoreResult<Self> {
        let mut graph = Self::new();
        for (id, parent, merge) in queries::edges(conn)? {
            graph.add(id, Edges { parent, merge });
        }
        Ok(graph)
    }

    /// Adds or replaces a node.
    pub fn add(&mut self, id: ChangesetId, edges: Edges) {
        self.nodes.insert(id, edges);
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the node is known.
    pub fn contains(&self, id: ChangesetId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Edges of a node.
    pub fn edges(&self, id: ChangesetId) -> Option<Edges> {
        self.nodes.get(&id).copied()
    }

    /// Every node reachable backwards from `id`, including `id`.
    pub fn ancestors(&self, id: ChangesetId) -> HashSet<ChangesetId> {
        let mut visited = HashSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(edges) = self.nodes.get(&current) {
                frontier.extend(edges.iter().filter(|p| !visited.contains(p)));
            }
        }
        visited
    }

    /// Returns true if `ancestor` is reachable backwards from `id`.
    pub fn is_ancestor(&self, ancestor: ChangesetId, id: ChangesetId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Nodes that name `id` as a parent, ascending.
    pub fn children(&self, id: ChangesetId) -> Vec<ChangesetId> {
        self.nodes
            .iter()
            .filter(|(_, edges)| edges.iter().any(|p| p == id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Nodes not referenced by any other node, ascending.
    pub fn leaves(&self) -> Vec<ChangesetId> {
        let referenced: HashSet<ChangesetId> =
            self.nodes.values().flat_map(|edges| edges.iter()).collect();
        self.nodes
            .keys()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect()
    }

    /// Nodes without parents, ascending.
    pub fn roots(&self) -> Vec<ChangesetId> {
        self.nodes
            .iter()
            .filter(|(_, edges)| edges.parent.is_none() && edges.merge.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Non-merge nodes reachable from `from` without entering `excluded`.
    ///
    /// The walk follows both edges and stops at excluded or unknown nodes.
    /// The result is a post-order, primary edge first: every node appears
    /// after the ancestors it was reached through.
    pub fn branch_only(
        &self,
        from: ChangesetId,
        excluded: &HashSet<ChangesetId>,
    ) -> Vec<ChangesetId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(from, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if excluded.contains(&id) || !visited.insert(id) {
                continue;
            }
            let Some(edges) = self.nodes.get(&id) else {
                continue;
            };
            stack.push((id, true));
            // Popped in reverse: the primary parent is walked first.
            if let Some(merge) = edges.merge {
                stack.push((merge, false));
            }
            if let Some(parent) = edges.parent {
                stack.push((parent, false));
            }
        }

        order.retain(|id| self.nodes.get(id).is_some_and(|e| e.merge.is_none()));
        order
    }

    /// Checks references and acyclicity.
    pub fn verify(&self) -> GraphReport {
        let mut dangling = Vec::new();
        for (id, edges) in &self.nodes {
            for parent in edges.iter() {
                if !self.nodes.contains_key(&parent) {
                    dangling.push((*id, parent));
                }
            }
        }

        // Kahn's algorithm over known edges; whatever cannot be ordered is
        // part of, or depends on, a cycle.
        let mut pending: BTreeMap<ChangesetId, usize> = self
            .nodes
            .iter()
            .map(|(id, edges)| {
                let known = edges.iter().filter(|p| self.nodes.contains_key(p)).count();
                (*id, known)
            })
            .collect();
        let mut ready: Vec<ChangesetId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut children: BTreeMap<ChangesetId, Vec<ChangesetId>> = BTreeMap::new();
        for (id, edges) in &self.nodes {
            for parent in edges.iter() {
                children.entry(parent).or_default().push(*id);
            }
        }
        let mut ordered = BTreeSet::new();
        while let Some(id) = ready.pop() {
            ordered.insert(id);
            for &child in children.get(&id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(&child) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(child);
                    }
                }
            }
        }
        let cyclic = self
            .nodes
            .keys()
            .filter(|id| !ordered.contains(id))
            .copied()
            .collect();

        GraphReport {
            nodes: self.nodes.len(),
            roots: self.roots(),
            leaves: self.leaves(),
            dangling,
            cyclic,
        }
    }
}
