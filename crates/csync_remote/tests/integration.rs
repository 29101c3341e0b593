//! Integration tests for the sync engine against an in-memory remote.

use csync_core::Changeset;
use csync_remote::ledger;
use csync_remote::{
    ChangeToken, ChangesPage, CloudSync, MemoryRemote, RemoteRecord, RemoteResult, RemoteStore,
    RetryConfig, SyncConfig, SyncError, SyncState, DEFAULT_ZONE,
};
use csync_testkit::{Player, TestDevice};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

type Cloud = CloudSync<Arc<MemoryRemote>>;

fn cloud(device: &TestDevice, remote: &Arc<MemoryRemote>) -> Cloud {
    let config = SyncConfig::default().with_retry(RetryConfig::no_retry());
    CloudSync::new(config, device.store().clone(), Arc::clone(remote))
        .expect("Failed to create sync engine")
}

fn staged<R: RemoteStore>(cloud: &CloudSync<R>) -> usize {
    cloud
        .store()
        .database()
        .read(|conn| ledger::staged_count(conn))
        .unwrap()
}

#[test]
fn push_then_fetch_on_second_device() {
    let remote = Arc::new(MemoryRemote::new());
    let a = TestDevice::memory("a");
    let b = TestDevice::file("b");
    let (sync_a, sync_b) = (cloud(&a, &remote), cloud(&b, &remote));

    a.add_player("p1", "Ana", 1);
    a.add_player("p2", "Ben", 2);
    a.set_score("p1", 5).unwrap();

    let pushed = sync_a.push().unwrap();
    assert_eq!(pushed.len(), 3);
    assert_eq!(remote.record_count(DEFAULT_ZONE), Some(3));

    let report = sync_b.fetch().unwrap();
    assert_eq!(report.inserted, pushed);
    assert!(b.store().pull().unwrap());
    assert_eq!(b.players(), a.players());
    assert_eq!(b.head(), a.head());
}

#[test]
fn empty_sync() {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::memory("a");
    let sync = cloud(&device, &remote);

    let result = sync.sync().unwrap();
    assert!(result.pushed.is_empty());
    assert!(result.fetched.inserted.is_empty());
    assert_eq!(result.fetched.pages, 1);
    assert_eq!(sync.state(), SyncState::Synced);
    assert!(remote.has_zone(DEFAULT_ZONE));
}

#[test]
fn repeated_push_leaves_one_record() {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::memory("a");
    let sync = cloud(&device, &remote);
    let id = device.add_player("p1", "Ana", 1);

    // A previous push saved the record but never flagged the node.
    let node = device.store().get(id).unwrap();
    remote.create_zone(DEFAULT_ZONE).unwrap();
    remote
        .save(DEFAULT_ZONE, RemoteRecord::from_changeset(&node).unwrap())
        .unwrap();

    assert_eq!(sync.push().unwrap(), vec![id]);
    assert_eq!(remote.record_count(DEFAULT_ZONE), Some(1));
    assert_eq!(sync.stats().push_conflicts, 0);
    assert!(device.store().get(id).unwrap().pushed);
    assert!(sync.push().unwrap().is_empty());
}

#[test]
fn conflicting_record_still_flags_node() {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::memory("a");
    let sync = cloud(&device, &remote);
    let id = device.add_player("p1", "Ana", 1);

    let mut other: Changeset = device.store().get(id).unwrap();
    other.meta = json!({"written": "elsewhere"});
    let existing = RemoteRecord::from_changeset(&other).unwrap();
    remote.create_zone(DEFAULT_ZONE).unwrap();
    remote.save(DEFAULT_ZONE, existing.clone()).unwrap();

    assert_eq!(sync.push().unwrap(), vec![id]);
    assert_eq!(sync.stats().push_conflicts, 1);
    assert!(device.store().unpushed().unwrap().is_empty());
    assert_eq!(
        remote.record(DEFAULT_ZONE, &id.to_string()),
        Some(existing)
    );
}

#[test]
fn disconnected_push_keeps_nodes_unpushed() {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::memory("a");
    let sync = cloud(&device, &remote);
    device.add_player("p1", "Ana", 1);

    remote.set_connected(false);
    let err = sync.push().unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(sync.state(), SyncState::Error);
    assert_eq!(device.store().unpushed().unwrap().len(), 1);

    remote.set_connected(true);
    assert_eq!(sync.push().unwrap().len(), 1);
    assert!(sync.stats().last_error.is_none());
}

#[test]
fn interrupted_fetch_resumes_after_last_page() {
    let remote = Arc::new(MemoryRemote::with_page_size(2));
    let a = TestDevice::memory("a");
    for n in 0..5 {
        a.add_player(&format!("p{n}"), "Player", n);
    }
    cloud(&a, &remote).push().unwrap();

    let interrupted = TestDevice::memory("interrupted");
    let sync = cloud(&interrupted, &remote);
    sync.setup().unwrap();
    remote.fail_changes_after(Some(1));
    let err = sync.fetch().unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
    assert!(err.is_retryable());
    assert_eq!(staged(&sync), 2);
    assert!(interrupted.store().changesets().unwrap().is_empty());

    remote.fail_changes_after(None);
    let resumed = sync.fetch().unwrap();
    assert_eq!(resumed.pages, 2);
    assert_eq!(resumed.staged, 3);
    assert_eq!(resumed.inserted.len(), 5);
    assert_eq!(staged(&sync), 0);

    let straight = TestDevice::memory("straight");
    let report = cloud(&straight, &remote).fetch().unwrap();
    assert_eq!(report.pages, 3);

    let ids = |d: &TestDevice| {
        let mut ids: Vec<_> = d.store().changesets().unwrap().iter().map(|n| n.id).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&interrupted), ids(&straight));

    interrupted.store().pull().unwrap();
    straight.store().pull().unwrap();
    assert_eq!(interrupted.players(), a.players());
    assert_eq!(straight.players(), a.players());
}

#[test]
fn unreadable_record_is_skipped() {
    let remote = Arc::new(MemoryRemote::new());
    let one = TestDevice::memory("one");
    let two = TestDevice::memory("two");
    let hidden = one.add_player("a1", "Ana", 1);
    let visible = two.add_player("b1", "Ben", 2);
    cloud(&one, &remote).push().unwrap();
    cloud(&two, &remote).push().unwrap();
    remote.make_unreadable(DEFAULT_ZONE, &hidden.to_string());

    let reader = TestDevice::memory("reader");
    let sync = cloud(&reader, &remote);
    let report = sync.fetch().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.inserted, vec![visible]);
    assert_eq!(sync.stats().records_skipped, 1);
}

#[test]
fn child_of_corrupt_record_waits_for_parent() {
    let remote = Arc::new(MemoryRemote::new());
    let a = TestDevice::memory("a");
    let root = a.add_player("p1", "Ana", 1);
    let child = a.set_score("p1", 2).unwrap().unwrap();
    cloud(&a, &remote).push().unwrap();
    remote.corrupt_record(DEFAULT_ZONE, &root.to_string());

    let b = TestDevice::memory("b");
    let sync = cloud(&b, &remote);
    let report = sync.fetch().unwrap();
    assert!(report.skipped >= 1);
    assert!(report.inserted.is_empty());
    assert_eq!(report.orphans, 1);
    assert!(!b.store().contains(child).unwrap());

    // The parent arrives another way; the next fetch promotes the child.
    b.store().insert(vec![a.store().get(root).unwrap()]).unwrap();
    let report = sync.fetch().unwrap();
    assert_eq!(report.inserted, vec![child]);
    assert_eq!(report.orphans, 0);
    b.store().pull().unwrap();
    assert_eq!(b.players(), vec![Player::new("p1", "Ana", 2)]);
}

#[test]
fn reset_change_token_refetches_known_nodes() {
    let remote = Arc::new(MemoryRemote::new());
    let a = TestDevice::memory("a");
    let sync = cloud(&a, &remote);
    a.add_player("p1", "Ana", 1);
    sync.push().unwrap();

    assert!(sync.fetch().unwrap().inserted.is_empty());
    sync.reset_change_token().unwrap();
    let report = sync.fetch().unwrap();
    assert_eq!(report.staged, 0);
    assert!(report.inserted.is_empty());
    assert_eq!(a.store().changesets().unwrap().len(), 1);
}

#[test]
fn two_devices_converge_through_remote() {
    let remote = Arc::new(MemoryRemote::with_page_size(1));
    let a = TestDevice::memory("a");
    let b = TestDevice::memory("b");
    let (sync_a, sync_b) = (cloud(&a, &remote), cloud(&b, &remote));

    a.add_player("x", "Xavier", 1);
    sync_a.sync().unwrap();
    sync_b.sync().unwrap();
    b.store().pull().unwrap();

    a.set_score("x", 10).unwrap();
    b.add_player("y", "Yara", 2);
    sync_a.sync().unwrap();
    sync_b.sync().unwrap();
    sync_a.fetch().unwrap();
    assert_eq!(a.store().leaves().unwrap().len(), 2);

    let merges = a.store().merge_all().unwrap();
    assert_eq!(merges.len(), 1);
    assert_eq!(sync_a.push().unwrap(), vec![merges[0].id]);
    sync_b.fetch().unwrap();

    a.store().pull().unwrap();
    b.store().pull().unwrap();
    let expected = vec![Player::new("x", "Xavier", 10), Player::new("y", "Yara", 2)];
    assert_eq!(a.players(), expected);
    assert_eq!(b.players(), expected);
    assert_eq!(a.head(), Some(merges[0].id));
    assert_eq!(b.head(), a.head());
}

/// Forwards to a `MemoryRemote` and cancels the engine once, right after
/// the first successful save or the first delivered page.
struct CancellingRemote {
    inner: Arc<MemoryRemote>,
    cancel: OnceLock<Box<dyn Fn() + Send + Sync>>,
    after_save: AtomicBool,
    after_page: AtomicBool,
}

impl CancellingRemote {
    fn new(inner: &Arc<MemoryRemote>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::clone(inner),
            cancel: OnceLock::new(),
            after_save: AtomicBool::new(false),
            after_page: AtomicBool::new(false),
        })
    }

    fn trigger(&self, armed: &AtomicBool) {
        if armed.swap(false, Ordering::SeqCst) {
            if let Some(cancel) = self.cancel.get() {
                cancel();
            }
        }
    }
}

impl RemoteStore for CancellingRemote {
    fn create_zone(&self, zone: &str) -> RemoteResult<()> {
        self.inner.create_zone(zone)
    }

    fn delete_zone(&self, zone: &str) -> RemoteResult<()> {
        self.inner.delete_zone(zone)
    }

    fn save(&self, zone: &str, record: RemoteRecord) -> RemoteResult<()> {
        self.inner.save(zone, record)?;
        self.trigger(&self.after_save);
        Ok(())
    }

    fn changes_since(&self, zone: &str, since: Option<&ChangeToken>) -> RemoteResult<ChangesPage> {
        let page = self.inner.changes_since(zone, since)?;
        self.trigger(&self.after_page);
        Ok(page)
    }
}

fn cancellable(
    device: &TestDevice,
    remote: &Arc<MemoryRemote>,
) -> (Arc<CloudSync<Arc<CancellingRemote>>>, Arc<CancellingRemote>) {
    let wrapper = CancellingRemote::new(remote);
    let config = SyncConfig::default().with_retry(RetryConfig::no_retry());
    let sync = Arc::new(
        CloudSync::new(config, device.store().clone(), Arc::clone(&wrapper))
            .expect("Failed to create sync engine"),
    );
    let engine = Arc::downgrade(&sync);
    let hook: Box<dyn Fn() + Send + Sync> = Box::new(move || {
        if let Some(sync) = engine.upgrade() {
            sync.cancel();
        }
    });
    assert!(wrapper.cancel.set(hook).is_ok());
    (sync, wrapper)
}

#[test]
fn push_cancelled_midway_keeps_completed_nodes() {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::memory("a");
    let (sync, wrapper) = cancellable(&device, &remote);
    let ids: Vec<_> = (0..3)
        .map(|n| device.add_player(&format!("p{n}"), "Player", n))
        .collect();

    wrapper.after_save.store(true, Ordering::SeqCst);
    let err = sync.push().unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(sync.state(), SyncState::Error);
    assert_eq!(remote.record_count(DEFAULT_ZONE), Some(1));
    assert!(device.store().get(ids[0]).unwrap().pushed);
    let unpushed: Vec<_> = device.store().unpushed().unwrap().iter().map(|n| n.id).collect();
    assert_eq!(unpushed, ids[1..].to_vec());

    assert_eq!(sync.push().unwrap(), ids[1..].to_vec());
    assert_eq!(remote.record_count(DEFAULT_ZONE), Some(3));
    assert!(device.store().unpushed().unwrap().is_empty());
    assert_eq!(sync.stats().push_conflicts, 0);
}

#[test]
fn fetch_cancelled_midway_keeps_completed_page() {
    let remote = Arc::new(MemoryRemote::with_page_size(2));
    let a = TestDevice::memory("a");
    for n in 0..3 {
        a.add_player(&format!("p{n}"), "Player", n);
    }
    cloud(&a, &remote).push().unwrap();
    let first_page = remote.changes_since(DEFAULT_ZONE, None).unwrap();

    let b = TestDevice::memory("b");
    let (sync, wrapper) = cancellable(&b, &remote);
    wrapper.after_page.store(true, Ordering::SeqCst);
    let err = sync.fetch().unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(staged(&*sync), 2);
    assert!(b.store().changesets().unwrap().is_empty());
    let token = b
        .database()
        .read(|conn| ledger::change_token(conn))
        .unwrap();
    assert_eq!(token, Some(first_page.token));

    let resumed = sync.fetch().unwrap();
    assert_eq!(resumed.pages, 1);
    assert_eq!(resumed.staged, 1);
    assert_eq!(resumed.inserted.len(), 3);
    assert_eq!(staged(&*sync), 0);
    b.store().pull().unwrap();
    assert_eq!(b.players(), a.players());
}
