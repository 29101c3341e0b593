//! Store statistics.
//!
//! Counters are atomic and may be read while operations are in progress.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for a database.
#[derive(Debug, Default)]
pub struct StoreStats {
    commits: AtomicU64,
    empty_commits: AtomicU64,
    pulls: AtomicU64,
    nodes_applied: AtomicU64,
    conflicts_omitted: AtomicU64,
    merges: AtomicU64,
    nodes_inserted: AtomicU64,
    resets: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self, created_node: bool) {
        if created_node {
            self.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.empty_commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_pull(&self, applied: usize, conflicts: usize) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        self.nodes_applied
            .fetch_add(applied as u64, Ordering::Relaxed);
        self.conflicts_omitted
            .fetch_add(conflicts as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self, count: usize) {
        self.nodes_inserted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            empty_commits: self.empty_commits.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            nodes_applied: self.nodes_applied.load(Ordering::Relaxed),
            conflicts_omitted: self.conflicts_omitted.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            nodes_inserted: self.nodes_inserted.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Commits that created a node.
    pub commits: u64,
    /// Commits whose mutation changed nothing.
    pub empty_commits: u64,
    /// Pull calls.
    pub pulls: u64,
    /// Nodes applied by pulls.
    pub nodes_applied: u64,
    /// Operations omitted on conflict during pulls.
    pub conflicts_omitted: u64,
    /// Merge nodes created.
    pub merges: u64,
    /// Nodes inserted without being applied.
    pub nodes_inserted: u64,
    /// History resets.
    pub resets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StoreStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();
        stats.record_commit(true);
        stats.record_commit(false);
        stats.record_pull(3, 1);
        stats.record_pull(0, 0);
        stats.record_merge();
        stats.record_insert(4);
        stats.record_reset();

        let snap = stats.snapshot();
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.empty_commits, 1);
        assert_eq!(snap.pulls, 2);
        assert_eq!(snap.nodes_applied, 3);
        assert_eq!(snap.conflicts_omitted, 1);
        assert_eq!(snap.merges, 1);
        assert_eq!(snap.nodes_inserted, 4);
        assert_eq!(snap.resets, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_commit(true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().commits, 800);
    }
}
