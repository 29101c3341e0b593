//! Changeset nodes of the commit graph.

use crate::error::{CoreError, CoreResult};
use crate::id::ChangesetId;
use csync_codec::Delta;
use serde_json::Value as Meta;

/// Which edge of a node led to it from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The primary `parent_id` edge.
    Parent,
    /// The secondary `merge_id` edge.
    Merge,
}

/// A node of the commit graph.
///
/// `parent_delta` turns the state at `parent_id` into the state at this
/// node. Merge nodes additionally carry `merge_delta`, which turns the state
/// at `merge_id` into the same state.
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    /// Unique identifier.
    pub id: ChangesetId,
    /// Primary predecessor, `None` only for roots.
    pub parent_id: Option<ChangesetId>,
    /// Delta from the primary predecessor.
    pub parent_delta: Delta,
    /// Secondary predecessor of a merge node.
    pub merge_id: Option<ChangesetId>,
    /// Delta from the secondary predecessor.
    pub merge_delta: Option<Delta>,
    /// Whether the node is known to exist remotely.
    pub pushed: bool,
    /// Opaque caller metadata.
    pub meta: Meta,
}

impl Changeset {
    /// Creates an unpushed, non-merge node with a fresh id.
    pub fn new(parent_id: Option<ChangesetId>, parent_delta: Delta, meta: Meta) -> Self {
        Self {
            id: ChangesetId::new(),
            parent_id,
            parent_delta,
            merge_id: None,
            merge_delta: None,
            pushed: false,
            meta,
        }
    }

    /// Creates an unpushed merge node with a fresh id.
    pub fn merge(
        main: ChangesetId,
        forward: Delta,
        branch: ChangesetId,
        reverse: Delta,
        meta: Meta,
    ) -> Self {
        Self {
            id: ChangesetId::new(),
            parent_id: Some(main),
            parent_delta: forward,
            merge_id: Some(branch),
            merge_delta: Some(reverse),
            pushed: false,
            meta,
        }
    }

    /// Returns true if the node has two parents.
    pub fn is_merge(&self) -> bool {
        self.merge_id.is_some()
    }

    /// Returns true if the node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.merge_id.is_none()
    }

    /// Identifiers of the node's parents, primary first.
    pub fn parents(&self) -> impl Iterator<Item = ChangesetId> {
        self.parent_id.into_iter().chain(self.merge_id)
    }

    /// The delta that moves a store from `from` to this node, if `from` is a
    /// parent.
    pub fn delta_from(&self, from: ChangesetId) -> Option<(Edge, &Delta)> {
        if self.parent_id == Some(from) {
            Some((Edge::Parent, &self.parent_delta))
        } else if self.merge_id == Some(from) {
            self.merge_delta.as_ref().map(|delta| (Edge::Merge, delta))
        } else {
            None
        }
    }

    /// Check the node's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the second edge is half present, a
    /// merge node lacks a primary parent, an edge points at the node itself
    /// or both edges name the same parent, or a non-merge node has an empty
    /// delta. Returns a codec error if a delta is malformed.
    pub fn validate(&self) -> CoreResult<()> {
        match (&self.merge_id, &self.merge_delta) {
            (Some(_), None) => {
                return Err(CoreError::integrity(format!(
                    "merge node {} is missing its merge delta",
                    self.id
                )))
            }
            (None, Some(_)) => {
                return Err(CoreError::integrity(format!(
                    "node {} has a merge delta without a merge parent",
                    self.id
                )))
            }
            _ => {}
        }

        if self.is_merge() && self.parent_id.is_none() {
            return Err(CoreError::integrity(format!(
                "merge node {} has no primary parent",
                self.id
            )));
        }
        if self.parents().any(|parent| parent == self.id) {
            return Err(CoreError::integrity(format!(
                "node {} references itself",
                self.id
            )));
        }
        if self.is_merge() && self.parent_id == self.merge_id {
            return Err(CoreError::integrity(format!(
                "merge node {} names the same parent twice",
                self.id
            )));
        }
        if !self.is_merge() && self.parent_delta.is_empty() {
            return Err(CoreError::integrity(format!(
                "node {} has an empty delta",
                self.id
            )));
        }

        self.parent_delta.validate()?;
        if let Some(delta) = &self.merge_delta {
            delta.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_codec::{encode, Operation, Value};
    use serde_json::json;

    fn delta() -> Delta {
        encode(&[Operation::insert(
            "player",
            vec![true],
            vec![Value::from("p1")],
        )])
        .unwrap()
    }

    #[test]
    fn plain_node_is_valid() {
        let node = Changeset::new(None, delta(), json!({}));
        assert!(node.is_root());
        assert!(!node.is_merge());
        node.validate().unwrap();
    }

    #[test]
    fn empty_delta_rejected() {
        let node = Changeset::new(None, Delta::empty(), json!({}));
        assert!(matches!(node.validate(), Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn merge_node_may_carry_empty_deltas() {
        let node = Changeset::merge(
            ChangesetId::new(),
            Delta::empty(),
            ChangesetId::new(),
            Delta::empty(),
            json!(null),
        );
        node.validate().unwrap();
        assert_eq!(node.parents().count(), 2);
    }

    #[test]
    fn dangling_second_edge_rejected() {
        let mut node = Changeset::new(Some(ChangesetId::new()), delta(), json!({}));
        node.merge_id = Some(ChangesetId::new());
        assert!(matches!(node.validate(), Err(CoreError::Integrity { .. })));

        let mut node = Changeset::new(Some(ChangesetId::new()), delta(), json!({}));
        node.merge_delta = Some(delta());
        assert!(matches!(node.validate(), Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn self_reference_rejected() {
        let mut node = Changeset::new(None, delta(), json!({}));
        node.parent_id = Some(node.id);
        assert!(node.validate().is_err());
    }

    #[test]
    fn delta_from_picks_edge() {
        let main = ChangesetId::new();
        let branch = ChangesetId::new();
        let node = Changeset::merge(main, delta(), branch, Delta::empty(), json!(null));
        assert_eq!(node.delta_from(main).map(|(edge, _)| edge), Some(Edge::Parent));
        let (edge, reverse) = node.delta_from(branch).unwrap();
        assert_eq!(edge, Edge::Merge);
        assert!(reverse.is_empty());
        assert!(node.delta_from(ChangesetId::new()).is_none());
    }
}
