//! Sync engine: push local nodes to a remote zone and fetch the nodes other
//! devices pushed.

use crate::config::SyncConfig;
use crate::error::{RemoteResult, SyncError, SyncResult};
use crate::ledger;
use crate::record::RemoteRecord;
use crate::remote::RemoteStore;
use csync_core::{queries, Changeset, ChangesetId, ChangesetStore};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle.
    Idle,
    /// Engine is creating the remote zone.
    SettingUp,
    /// Engine is fetching remote changes.
    Fetching,
    /// Engine is pushing local nodes.
    Pushing,
    /// Engine is waiting before retrying a remote call.
    RetryWait,
    /// The last operation completed.
    Synced,
    /// The last operation failed.
    Error,
}

impl SyncState {
    /// Returns true while an operation is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::SettingUp | SyncState::Fetching | SyncState::Pushing | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Nodes saved remotely, idempotent conflicts included.
    pub nodes_pushed: u64,
    /// Pushes that hit an idempotent conflict.
    pub push_conflicts: u64,
    /// Nodes promoted into the local graph by fetches.
    pub nodes_fetched: u64,
    /// Change pages processed.
    pub pages_fetched: u64,
    /// Remote records skipped because they could not be read or decoded.
    pub records_skipped: u64,
    /// Retries of remote calls.
    pub retries: u64,
    /// Completion time of the last successful push or fetch.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Change pages processed.
    pub pages: usize,
    /// Nodes newly staged by this fetch.
    pub staged: usize,
    /// Nodes inserted into the graph, in insertion order.
    pub inserted: Vec<ChangesetId>,
    /// Staged nodes still waiting for a parent.
    pub orphans: usize,
    /// Records skipped because they could not be read or decoded.
    pub skipped: usize,
}

/// Outcome of [`CloudSync::sync`].
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// What the fetch did.
    pub fetched: FetchReport,
    /// Nodes pushed.
    pub pushed: Vec<ChangesetId>,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Pushes and fetches changesets through a [`RemoteStore`] zone.
///
/// Network calls never run inside a local transaction. Push reads the
/// unpushed nodes, saves each remotely and then flags it locally. Fetch
/// stages every page together with its change token, so an interrupted
/// fetch resumes after the last completed page. Both are safe to re-run
/// after a failure.
pub struct CloudSync<R: RemoteStore> {
    config: SyncConfig,
    store: ChangesetStore,
    remote: R,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<R: RemoteStore> CloudSync<R> {
    /// Creates an engine and installs the ledger tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger migration fails.
    pub fn new(config: SyncConfig, store: ChangesetStore, remote: R) -> SyncResult<Self> {
        store.database().migrate(&ledger::ledger_migrations()?)?;
        Ok(Self {
            config,
            store,
            remote,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// The local store.
    pub fn store(&self) -> &ChangesetStore {
        &self.store
    }

    /// The remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels a running push or fetch at the next record or page boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Returns true once the zone is known to exist.
    ///
    /// # Errors
    ///
    /// Returns a local store error.
    pub fn is_setup(&self) -> SyncResult<bool> {
        Ok(self.store.database().read(|conn| ledger::zone_created(conn))?)
    }

    /// Creates the zone unless the ledger says it exists.
    ///
    /// # Errors
    ///
    /// Returns the remote error if zone creation fails.
    pub fn setup(&self) -> SyncResult<()> {
        if self.is_setup()? {
            return Ok(());
        }
        self.set_state(SyncState::SettingUp);
        let zone = self.config.zone.as_str();
        self.finish(
            self.with_retry("create zone", || self.remote.create_zone(zone))
                .map_err(SyncError::from)
                .and_then(|()| {
                    self.store
                        .database()
                        .write(|tx| ledger::set_zone_created(tx, true))?;
                    tracing::info!(zone, "remote zone set up");
                    Ok(())
                }),
        )
    }

    /// Saves every unpushed node remotely and flags it as pushed.
    ///
    /// A conflict means the record already exists, for instance because an
    /// earlier push saved it but failed before flagging it locally; the node
    /// is flagged as pushed anyway. Any other remote error stops the push;
    /// nodes handled before it stay flagged.
    ///
    /// # Errors
    ///
    /// Returns the first remote error that is not a conflict, a local store
    /// error, or [`SyncError::Cancelled`].
    pub fn push(&self) -> SyncResult<Vec<ChangesetId>> {
        self.reset_cancel();
        self.setup()?;
        self.set_state(SyncState::Pushing);
        let result = self.push_all();
        self.finish(result)
    }

    fn push_all(&self) -> SyncResult<Vec<ChangesetId>> {
        let zone = self.config.zone.as_str();
        let nodes = self.store.database().read(|conn| queries::unpushed(conn))?;
        let mut pushed = Vec::with_capacity(nodes.len());

        for node in nodes {
            self.check_cancelled()?;
            let record = RemoteRecord::from_changeset(&node)?;
            match self.with_retry("save", || self.remote.save(zone, record.clone())) {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    tracing::warn!(id = %node.id, "changeset already pushed");
                    self.stats.write().push_conflicts += 1;
                }
                Err(err) => {
                    tracing::warn!(id = %node.id, error = %err, "push stopped");
                    return Err(err.into());
                }
            }
            self.store.mark_pushed(node.id)?;
            self.stats.write().nodes_pushed += 1;
            pushed.push(node.id);
        }

        tracing::info!(pushed = pushed.len(), "pushed changesets");
        Ok(pushed)
    }

    /// Fetches remote changes and inserts the new nodes into the graph.
    ///
    /// Each page is staged with its change token in one transaction.
    /// Records that cannot be read or decoded are logged and skipped. At the
    /// end every staged node whose parents are known is inserted in one
    /// batch; the rest stay staged for a later fetch.
    ///
    /// # Errors
    ///
    /// Returns a remote error if a page cannot be fetched, a local store
    /// error, or [`SyncError::Cancelled`]. Pages completed before the error
    /// are kept.
    pub fn fetch(&self) -> SyncResult<FetchReport> {
        self.reset_cancel();
        self.setup()?;
        self.set_state(SyncState::Fetching);
        let result = self.fetch_all();
        self.finish(result)
    }

    fn fetch_all(&self) -> SyncResult<FetchReport> {
        let zone = self.config.zone.as_str();
        let mut report = FetchReport::default();

        loop {
            self.check_cancelled()?;
            let token = self
                .store
                .database()
                .read(|conn| ledger::change_token(conn))?;
            let page = self.with_retry("changes", || self.remote.changes_since(zone, token.as_ref()))?;

            let mut nodes = Vec::with_capacity(page.records.len());
            for entry in page.records {
                match entry.map_err(SyncError::from).and_then(|record| {
                    record.to_changeset().map_err(SyncError::from)
                }) {
                    Ok(node) => nodes.push(node),
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping remote record");
                        report.skipped += 1;
                    }
                }
            }

            let staged = self.store.database().write(|tx| {
                let mut staged = 0usize;
                for node in &nodes {
                    if queries::contains(tx, node.id)? || ledger::is_staged(tx, node.id)? {
                        continue;
                    }
                    ledger::stage(tx, node)?;
                    staged += 1;
                }
                ledger::set_change_token(tx, Some(&page.token))?;
                Ok(staged)
            })?;

            report.pages += 1;
            report.staged += staged;
            tracing::debug!(records = nodes.len(), staged, "fetched page");
            if !page.more_coming {
                break;
            }
        }

        report.inserted = self.promote()?;
        report.orphans = self
            .store
            .database()
            .read(|conn| ledger::staged_count(conn))?;
        if report.orphans > 0 {
            tracing::warn!(orphans = report.orphans, "fetched changesets wait for parents");
        }

        {
            let mut stats = self.stats.write();
            stats.pages_fetched += report.pages as u64;
            stats.nodes_fetched += report.inserted.len() as u64;
            stats.records_skipped += report.skipped as u64;
        }
        tracing::info!(
            pages = report.pages,
            inserted = report.inserted.len(),
            skipped = report.skipped,
            "fetched changesets"
        );
        Ok(report)
    }

    /// Moves staged nodes whose ancestry is complete into the graph.
    fn promote(&self) -> SyncResult<Vec<ChangesetId>> {
        let inserted = self.store.insert_from(|tx| {
            let staged = ledger::staged(tx)?;
            let mut ready: Vec<Changeset> = Vec::new();
            let mut known: HashSet<ChangesetId> = HashSet::new();
            let mut waiting = Vec::new();

            for node in staged {
                ledger::unstage(tx, node.id)?;
                if queries::contains(tx, node.id)? {
                    continue;
                }
                waiting.push(node);
            }

            loop {
                let before = waiting.len();
                let mut still_waiting = Vec::new();
                for node in waiting {
                    let mut parents_known = true;
                    for parent in node.parents() {
                        if !known.contains(&parent) && !queries::contains(tx, parent)? {
                            parents_known = false;
                            break;
                        }
                    }
                    if parents_known {
                        known.insert(node.id);
                        ready.push(node);
                    } else {
                        still_waiting.push(node);
                    }
                }
                waiting = still_waiting;
                if waiting.len() == before {
                    break;
                }
            }

            for orphan in &waiting {
                ledger::stage(tx, orphan)?;
            }
            Ok(ready)
        })?;
        Ok(inserted)
    }

    /// Fetches, then pushes.
    ///
    /// # Errors
    ///
    /// Returns the first error of either step.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let fetched = self.fetch()?;
        let pushed = self.push()?;
        Ok(SyncCycleResult {
            fetched,
            pushed,
            duration: start.elapsed(),
        })
    }

    /// Deletes the remote zone, forgets the ledger and sets up again.
    ///
    /// Local nodes keep their pushed flags.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the zone cannot be deleted or recreated.
    pub fn reset_remote(&self) -> SyncResult<()> {
        let zone = self.config.zone.as_str();
        self.with_retry("delete zone", || self.remote.delete_zone(zone))?;
        self.store.database().write(|tx| ledger::clear(tx))?;
        tracing::info!(zone, "remote zone reset");
        self.setup()
    }

    /// Forgets the change token so the next fetch starts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns a local store error.
    pub fn reset_change_token(&self) -> SyncResult<()> {
        self.store
            .database()
            .write(|tx| ledger::set_change_token(tx, None))?;
        Ok(())
    }

    /// Runs a remote call, retrying retryable errors per the retry config.
    fn with_retry<T>(&self, what: &str, mut call: impl FnMut() -> RemoteResult<T>) -> RemoteResult<T> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::debug!(call = what, attempt, error = %err, "retrying remote call");
                    self.stats.write().retries += 1;
                    if !delay.is_zero() {
                        let previous = self.state();
                        self.set_state(SyncState::RetryWait);
                        std::thread::sleep(delay);
                        self.set_state(previous);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn finish<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(err) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(err.to_string());
            }
        }
        result
    }
}

impl<R: RemoteStore> std::fmt::Debug for CloudSync<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSync")
            .field("zone", &self.config.zone)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::RemoteError;
    use crate::remote::MemoryRemote;
    use csync_core::Database;
    use serde_json::json;
    use std::sync::Arc;

    const ZONE: &str = "ChangeSets";

    fn device(remote: &Arc<MemoryRemote>) -> CloudSync<Arc<MemoryRemote>> {
        let db = Database::open_in_memory().unwrap();
        db.write(|tx| {
            tx.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL);")?;
            Ok(())
        })
        .unwrap();
        let config = SyncConfig::new(ZONE).with_retry(RetryConfig::immediate(3));
        CloudSync::new(config, ChangesetStore::new(Arc::new(db)), Arc::clone(remote)).unwrap()
    }

    fn put(sync: &CloudSync<Arc<MemoryRemote>>, k: &str, v: i64) {
        sync.store()
            .commit(json!({ "k": k }), |conn| {
                conn.execute(
                    "INSERT INTO kv VALUES (?1, ?2) ON CONFLICT (k) DO UPDATE SET v = excluded.v",
                    rusqlite::params![k, v],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn setup_is_remembered() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = device(&remote);
        assert!(!sync.is_setup().unwrap());
        sync.setup().unwrap();
        assert!(sync.is_setup().unwrap());
        assert!(remote.has_zone(ZONE));

        // A remembered zone is not created again.
        remote.set_connected(false);
        sync.setup().unwrap();
    }

    #[test]
    fn push_then_fetch_elsewhere() {
        let remote = Arc::new(MemoryRemote::new());
        let one = device(&remote);
        let two = device(&remote);
        put(&one, "a", 1);
        put(&one, "b", 2);

        let pushed = one.push().unwrap();
        assert_eq!(pushed.len(), 2);
        assert!(one.store().unpushed().unwrap().is_empty());
        assert_eq!(one.state(), SyncState::Synced);

        let report = two.fetch().unwrap();
        assert_eq!(report.inserted, pushed);
        assert_eq!(report.orphans, 0);
        assert!(two.store().changesets().unwrap().iter().all(|n| n.pushed));
        assert!(two.store().pull().unwrap());
        assert!(two.push().unwrap().is_empty());
    }

    #[test]
    fn push_error_keeps_earlier_progress() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = device(&remote);
        sync.setup().unwrap();
        put(&sync, "a", 1);
        put(&sync, "b", 2);

        remote.fail_next_save(RemoteError::transport_fatal("rejected"));
        let err = sync.push().unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert_eq!(sync.state(), SyncState::Error);
        assert!(sync.stats().last_error.is_some());
        assert_eq!(sync.store().unpushed().unwrap().len(), 2);

        assert_eq!(sync.push().unwrap().len(), 2);
    }

    #[test]
    fn retryable_save_is_retried() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = device(&remote);
        put(&sync, "a", 1);
        remote.fail_next_save(RemoteError::Timeout);
        assert_eq!(sync.push().unwrap().len(), 1);
        assert_eq!(sync.stats().retries, 1);
    }

    #[test]
    fn cancel_flag() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = device(&remote);
        sync.cancel();
        assert!(sync.check_cancelled().is_err());
        sync.reset_cancel();
        assert!(sync.check_cancelled().is_ok());
    }

    #[test]
    fn reset_remote_recreates_zone() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = device(&remote);
        put(&sync, "a", 1);
        sync.push().unwrap();
        assert_eq!(remote.record_count(ZONE), Some(1));

        sync.reset_remote().unwrap();
        assert_eq!(remote.record_count(ZONE), Some(0));
        assert!(sync.is_setup().unwrap());
        let token = sync
            .store()
            .database()
            .read(|conn| ledger::change_token(conn))
            .unwrap();
        assert!(token.is_none());
    }
}
