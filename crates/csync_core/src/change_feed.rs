//! Change feed for observing committed store operations.
//!
//! Events are emitted after the write transaction that produced them has
//! committed, once per operation. A pull that applies ten nodes emits a
//! single [`StoreEventKind::Pulled`] event.
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = db.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("store changed: {:?}", event.kind);
//!     }
//! });
//! ```

use crate::id::ChangesetId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEventKind {
    /// A local commit created a node and advanced head.
    Committed {
        /// The new node.
        id: ChangesetId,
    },
    /// A pull applied one or more nodes.
    Pulled {
        /// Head after the pull.
        head: ChangesetId,
        /// Number of nodes applied.
        applied: usize,
    },
    /// A merge node was created.
    Merged {
        /// The merge node.
        id: ChangesetId,
    },
    /// Nodes were inserted without being applied, e.g. after a fetch.
    Inserted {
        /// Number of nodes inserted.
        count: usize,
    },
    /// Local history was wiped.
    Reset,
}

/// A single event from the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Monotonic sequence number, starting at 1.
    pub sequence: u64,
    /// What happened.
    pub kind: StoreEventKind,
}

/// Distributes store events to subscribers.
///
/// Disconnected subscribers are dropped on the next emit. A bounded history
/// allows catch-up polling from a sequence cursor.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
    history: RwLock<Vec<StoreEvent>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Assigns the next sequence number and delivers the event.
    pub fn emit(&self, kind: StoreEventKind) -> StoreEvent {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = StoreEvent { sequence, kind };

        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        event
    }

    /// Returns events with sequence greater than `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StoreEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest emitted sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        let event = feed.emit(StoreEventKind::Reset);
        assert_eq!(event.sequence, 1);

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        let event = feed.emit(StoreEventKind::Inserted { count: 2 });

        assert_eq!(rx1.recv().unwrap(), event);
        assert_eq!(rx2.recv().unwrap(), event);
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(StoreEventKind::Reset);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_from_cursor() {
        let feed = ChangeFeed::with_max_history(3);
        for count in 1..=5 {
            feed.emit(StoreEventKind::Inserted { count });
        }

        let events = feed.poll(0, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 3);

        let events = feed.poll(4, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StoreEventKind::Inserted { count: 5 });
        assert_eq!(feed.latest_sequence(), 5);
    }

    #[test]
    fn threaded_subscribe() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.subscribe();

        let id = ChangesetId::new();
        let feed_clone = Arc::clone(&feed);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            feed_clone.emit(StoreEventKind::Committed { id });
        });

        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received.kind, StoreEventKind::Committed { id });
        handle.join().unwrap();
    }
}
