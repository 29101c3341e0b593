//! Multi-device integration test helpers.
//!
//! A [`Fleet`] is a set of [`TestDevice`]s that exchange changesets by
//! copying nodes directly between stores. It stands in for a remote when a
//! test only cares about the commit graph and merge engine.

use crate::fixtures::{Player, TestDevice};
use crate::generators::PlayerAction;
use csync_core::ChangesetId;

/// A group of devices sharing one logical database.
pub struct Fleet {
    devices: Vec<TestDevice>,
}

impl Fleet {
    /// Creates `count` in-memory devices named `d0`, `d1`, ...
    pub fn new(count: usize) -> Self {
        Self {
            devices: (0..count)
                .map(|n| TestDevice::memory(format!("d{n}")))
                .collect(),
        }
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if the fleet has no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// A device by index.
    pub fn device(&self, index: usize) -> &TestDevice {
        &self.devices[index]
    }

    /// All devices.
    pub fn devices(&self) -> &[TestDevice] {
        &self.devices
    }

    /// Applies a sequence of edits on one device.
    pub fn run(&self, index: usize, actions: &[PlayerAction]) -> Vec<ChangesetId> {
        actions
            .iter()
            .filter_map(|action| action.apply(&self.devices[index]))
            .collect()
    }

    /// Copies every node each device lacks from every other device.
    /// Returns the number of nodes copied.
    pub fn exchange(&self) -> usize {
        let mut copied = 0;
        for to in &self.devices {
            for from in &self.devices {
                if !std::ptr::eq(to, from) {
                    copied += to.receive_from(from);
                }
            }
        }
        copied
    }

    /// Joins every branch and moves head to the single leaf on every device.
    ///
    /// Only the first device merges; the merge nodes reach the others by
    /// exchange, the way a merge made on one device spreads through a
    /// remote.
    pub fn converge(&self) {
        self.exchange();
        let Some(first) = self.devices.first() else {
            return;
        };
        first
            .store()
            .merge_all()
            .expect("Failed to merge branches");
        self.exchange();
        for device in &self.devices {
            device.store().pull().expect("Failed to pull");
        }
    }

    /// Asserts that every device has the same head and rows, and a valid
    /// graph. Returns the common rows.
    pub fn assert_converged(&self) -> Vec<Player> {
        let Some(first) = self.devices.first() else {
            return Vec::new();
        };
        let head = first.head();
        let players = first.players();
        for device in &self.devices {
            assert_eq!(device.head(), head, "head of {} differs", device.name);
            assert_eq!(device.players(), players, "rows of {} differ", device.name);
            let report = device.store().verify().expect("Failed to verify");
            assert!(report.is_ok(), "graph of {} is invalid: {report:?}", device.name);
            assert!(
                device.store().leaves().expect("Failed to list leaves").len() <= 1,
                "{} has more than one leaf",
                device.name
            );
        }
        players
    }
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("devices", &self.devices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(id: &str, score: i64) -> PlayerAction {
        PlayerAction::Add {
            id: id.into(),
            name: id.to_uppercase(),
            score,
        }
    }

    #[test]
    fn test_fleet_converges_on_disjoint_rows() {
        let fleet = Fleet::new(3);
        fleet.run(0, &[add("a1", 1), add("a2", 2)]);
        fleet.run(1, &[add("b1", 3)]);
        fleet.run(
            2,
            &[
                add("c1", 4),
                PlayerAction::SetScore {
                    id: "c1".into(),
                    score: 5,
                },
            ],
        );

        fleet.converge();
        let players = fleet.assert_converged();
        let ids: Vec<_> = players.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1", "c1"]);
        assert_eq!(players[3].score, 5);
    }

    #[test]
    fn test_converge_twice_is_stable() {
        let fleet = Fleet::new(2);
        fleet.run(0, &[add("a1", 1)]);
        fleet.run(1, &[add("b1", 1)]);
        fleet.converge();
        let head = fleet.device(0).head();

        fleet.converge();
        assert_eq!(fleet.device(0).head(), head);
        fleet.assert_converged();
    }

    #[test]
    fn test_edits_after_converge() {
        let fleet = Fleet::new(2);
        fleet.run(0, &[add("a1", 1)]);
        fleet.converge();

        fleet.run(
            1,
            &[PlayerAction::Rename {
                id: "a1".into(),
                name: "Alma".into(),
            }],
        );
        fleet.converge();
        let players = fleet.assert_converged();
        assert_eq!(players, vec![Player::new("a1", "Alma", 1)]);
    }
}
