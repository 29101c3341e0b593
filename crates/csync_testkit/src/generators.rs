//! Property-based test generators using proptest.
//!
//! Provides strategies for changeset ids, codec operations and sequences of
//! player edits. Edit strategies take a namespace so that devices editing in
//! parallel touch disjoint rows.

use crate::fixtures::TestDevice;
use csync_codec::{Operation, Value};
use csync_core::ChangesetId;
use proptest::prelude::*;

/// Strategy for generating changeset ids.
pub fn changeset_id_strategy() -> impl Strategy<Value = ChangesetId> {
    prop::array::uniform16(any::<u8>()).prop_map(ChangesetId::from_bytes)
}

/// Strategy for generating column values other than undefined.
pub fn cell_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9..1.0e9f64).prop_map(Value::Real),
        "[a-z0-9 ]{0,16}".prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
    ]
}

/// Strategy for inserts and deletes on a three-column table `t` keyed by
/// its first column.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    (
        any::<bool>(),
        any::<i64>(),
        cell_value_strategy(),
        cell_value_strategy(),
    )
        .prop_map(|(insert, key, a, b)| {
            let row = vec![Value::Integer(key), a, b];
            let pk = vec![true, false, false];
            if insert {
                Operation::insert("t", pk, row)
            } else {
                Operation::delete("t", pk, row)
            }
        })
}

/// A player edit applied through a [`TestDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    /// Insert a player.
    Add {
        /// Player id.
        id: String,
        /// Player name.
        name: String,
        /// Initial score.
        score: i64,
    },
    /// Change a score.
    SetScore {
        /// Player id.
        id: String,
        /// New score.
        score: i64,
    },
    /// Change a name.
    Rename {
        /// Player id.
        id: String,
        /// New name.
        name: String,
    },
    /// Delete a player.
    Remove {
        /// Player id.
        id: String,
    },
}

impl PlayerAction {
    /// Applies the edit. Returns the changeset it created, if any.
    ///
    /// Adding a player that exists and editing one that does not are no-ops.
    pub fn apply(&self, device: &TestDevice) -> Option<ChangesetId> {
        match self {
            Self::Add { id, name, score } => {
                if device.player(id).is_some() {
                    return None;
                }
                Some(device.add_player(id, name, *score))
            }
            Self::SetScore { id, score } => device.set_score(id, *score).ok().flatten(),
            Self::Rename { id, name } => device.rename(id, name).ok().flatten(),
            Self::Remove { id } => device.remove_player(id).ok().flatten(),
        }
    }
}

/// Strategy for a single player edit on ids `{namespace}0` to `{namespace}3`.
pub fn player_action_strategy(namespace: &str) -> impl Strategy<Value = PlayerAction> {
    let ns = namespace.to_owned();
    let id = (0..4u8).prop_map(move |n| format!("{ns}{n}"));
    let name = || "[A-Z][a-z]{1,6}";
    prop_oneof![
        3 => (id.clone(), name(), 0..100i64)
            .prop_map(|(id, name, score)| PlayerAction::Add { id, name, score }),
        3 => (id.clone(), 0..100i64).prop_map(|(id, score)| PlayerAction::SetScore { id, score }),
        2 => (id.clone(), name()).prop_map(|(id, name)| PlayerAction::Rename { id, name }),
        1 => id.prop_map(|id| PlayerAction::Remove { id }),
    ]
}

/// Strategy for a sequence of player edits.
pub fn action_sequence_strategy(
    namespace: &str,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<PlayerAction>> {
    prop::collection::vec(player_action_strategy(namespace), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
