//! Remote store abstraction and an in-memory implementation.

use crate::error::{RemoteError, RemoteResult};
use crate::record::RemoteRecord;
use parking_lot::{Mutex, RwLock};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Opaque resumable position in a zone's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps bytes produced by a remote store.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw token.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl ToSql for ChangeToken {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for ChangeToken {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_blob().map(|b| Self(b.to_vec()))
    }
}

/// One page of changes.
#[derive(Debug, Clone)]
pub struct ChangesPage {
    /// Records modified since the requested token. Entries the store could
    /// not read come back as errors.
    pub records: Vec<RemoteResult<RemoteRecord>>,
    /// Position after this page.
    pub token: ChangeToken,
    /// Whether another page follows.
    pub more_coming: bool,
}

/// Zone-scoped keyed record storage with a change stream.
///
/// This trait is the integration point for a real service; every call may
/// block on the network.
pub trait RemoteStore: Send + Sync {
    /// Creates a zone. Creating an existing zone succeeds.
    fn create_zone(&self, zone: &str) -> RemoteResult<()>;

    /// Deletes a zone and every record in it. Deleting a missing zone
    /// succeeds.
    fn delete_zone(&self, zone: &str) -> RemoteResult<()>;

    /// Saves a record.
    ///
    /// Saving content identical to the stored record succeeds. Different
    /// content under the same name fails with [`RemoteError::Conflict`].
    fn save(&self, zone: &str, record: RemoteRecord) -> RemoteResult<()>;

    /// Lists records modified after `since`, one page at a time.
    fn changes_since(&self, zone: &str, since: Option<&ChangeToken>) -> RemoteResult<ChangesPage>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for Arc<R> {
    fn create_zone(&self, zone: &str) -> RemoteResult<()> {
        (**self).create_zone(zone)
    }

    fn delete_zone(&self, zone: &str) -> RemoteResult<()> {
        (**self).delete_zone(zone)
    }

    fn save(&self, zone: &str, record: RemoteRecord) -> RemoteResult<()> {
        (**self).save(zone, record)
    }

    fn changes_since(&self, zone: &str, since: Option<&ChangeToken>) -> RemoteResult<ChangesPage> {
        (**self).changes_since(zone, since)
    }
}

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Default)]
struct Zone {
    records: BTreeMap<String, StoredRecord>,
    /// Append-only modification log of record names; a token is a
    /// position in it.
    log: Vec<String>,
    unreadable: HashSet<String>,
}

#[derive(Debug)]
struct StoredRecord {
    record: RemoteRecord,
    hash: [u8; 32],
}

impl Zone {
    fn touch(&mut self, name: &str) {
        self.log.push(name.to_owned());
    }
}

/// An in-memory remote store shared by every device in a test.
///
/// Besides storage it can inject failures: disconnection, a failing next
/// save, change enumeration failing after a number of pages, and records
/// that cannot be read.
#[derive(Debug)]
pub struct MemoryRemote {
    page_size: usize,
    zones: RwLock<HashMap<String, Zone>>,
    connected: AtomicBool,
    fail_next_save: Mutex<Option<RemoteError>>,
    pages_before_failure: Mutex<Option<usize>>,
    saves: AtomicUsize,
}

impl MemoryRemote {
    /// Creates a store with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a store returning at most `page_size` records per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            zones: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
            fail_next_save: Mutex::new(None),
            pages_before_failure: Mutex::new(None),
            saves: AtomicUsize::new(0),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next save fail with `error` without storing anything.
    pub fn fail_next_save(&self, error: RemoteError) {
        *self.fail_next_save.lock() = Some(error);
    }

    /// Lets `pages` more change pages through, then fails enumeration with
    /// a retryable transport error until cleared with `None`.
    pub fn fail_changes_after(&self, pages: Option<usize>) {
        *self.pages_before_failure.lock() = pages;
    }

    /// Makes a record unreadable in change enumeration.
    pub fn make_unreadable(&self, zone: &str, name: &str) {
        let mut zones = self.zones.write();
        if let Some(zone) = zones.get_mut(zone) {
            zone.unreadable.insert(name.to_owned());
        }
    }

    /// Replaces a record's body with bytes that do not decode and logs it
    /// as modified.
    pub fn corrupt_record(&self, zone: &str, name: &str) {
        let mut zones = self.zones.write();
        let Some(zone) = zones.get_mut(zone) else {
            return;
        };
        if let Some(stored) = zone.records.get_mut(name) {
            stored.record.body = vec![0xff, 0xfe, 0xfd];
            stored.hash = stored.record.content_hash();
            zone.touch(name);
        }
    }

    /// Number of successful saves, identical re-saves included.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of records in a zone, or `None` if it does not exist.
    pub fn record_count(&self, zone: &str) -> Option<usize> {
        self.zones.read().get(zone).map(|z| z.records.len())
    }

    /// A stored record.
    pub fn record(&self, zone: &str, name: &str) -> Option<RemoteRecord> {
        self.zones
            .read()
            .get(zone)
            .and_then(|z| z.records.get(name))
            .map(|stored| stored.record.clone())
    }

    /// Returns true if the zone exists.
    pub fn has_zone(&self, zone: &str) -> bool {
        self.zones.read().contains_key(zone)
    }

    fn check_connected(&self) -> RemoteResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_position(position: usize) -> ChangeToken {
    ChangeToken((position as u64).to_be_bytes().to_vec())
}

fn decode_position(token: &ChangeToken) -> RemoteResult<usize> {
    let bytes: [u8; 8] = token
        .as_bytes()
        .try_into()
        .map_err(|_| RemoteError::transport_fatal("malformed change token"))?;
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| RemoteError::transport_fatal("change token out of range"))
}

impl RemoteStore for MemoryRemote {
    fn create_zone(&self, zone: &str) -> RemoteResult<()> {
        self.check_connected()?;
        self.zones.write().entry(zone.to_owned()).or_default();
        Ok(())
    }

    fn delete_zone(&self, zone: &str) -> RemoteResult<()> {
        self.check_connected()?;
        self.zones.write().remove(zone);
        Ok(())
    }

    fn save(&self, zone_name: &str, record: RemoteRecord) -> RemoteResult<()> {
        self.check_connected()?;
        if let Some(error) = self.fail_next_save.lock().take() {
            return Err(error);
        }

        let mut zones = self.zones.write();
        let zone = zones
            .get_mut(zone_name)
            .ok_or_else(|| RemoteError::ZoneNotFound {
                zone: zone_name.to_owned(),
            })?;

        let hash = record.content_hash();
        match zone.records.get(&record.name) {
            Some(existing) if existing.hash == hash => {}
            Some(_) => {
                return Err(RemoteError::Conflict {
                    record_name: record.name,
                })
            }
            None => {
                let name = record.name.clone();
                zone.records.insert(name.clone(), StoredRecord { record, hash });
                zone.touch(&name);
            }
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn changes_since(&self, zone_name: &str, since: Option<&ChangeToken>) -> RemoteResult<ChangesPage> {
        self.check_connected()?;
        {
            let mut budget = self.pages_before_failure.lock();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(RemoteError::transport_retryable("change enumeration failed"));
                }
                *remaining -= 1;
            }
        }

        let zones = self.zones.read();
        let zone = zones.get(zone_name).ok_or_else(|| RemoteError::ZoneNotFound {
            zone: zone_name.to_owned(),
        })?;

        let start = since.map(decode_position).transpose()?.unwrap_or(0).min(zone.log.len());
        let end = (start + self.page_size).min(zone.log.len());
        let records = zone.log[start..end]
            .iter()
            .filter_map(|name| {
                if zone.unreadable.contains(name) {
                    return Some(Err(RemoteError::transport_fatal(format!(
                        "record {name} could not be read"
                    ))));
                }
                zone.records.get(name).map(|stored| Ok(stored.record.clone()))
            })
            .collect();

        Ok(ChangesPage {
            records,
            token: encode_position(end),
            more_coming: end < zone.log.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONE: &str = "ChangeSets";

    fn record(name: &str, body: &[u8]) -> RemoteRecord {
        RemoteRecord::new(name, body.to_vec())
    }

    #[test]
    fn save_requires_zone() {
        let remote = MemoryRemote::new();
        assert!(matches!(
            remote.save(ZONE, record("a", b"1")),
            Err(RemoteError::ZoneNotFound { .. })
        ));
        remote.create_zone(ZONE).unwrap();
        remote.save(ZONE, record("a", b"1")).unwrap();
        assert_eq!(remote.record_count(ZONE), Some(1));
    }

    #[test]
    fn identical_save_is_accepted_and_different_content_conflicts() {
        let remote = MemoryRemote::new();
        remote.create_zone(ZONE).unwrap();
        remote.save(ZONE, record("a", b"1")).unwrap();
        remote.save(ZONE, record("a", b"1")).unwrap();
        assert_eq!(remote.save_count(), 2);

        let err = remote.save(ZONE, record("a", b"2")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(remote.record(ZONE, "a").unwrap().body, b"1".to_vec());
    }

    #[test]
    fn changes_are_paged() {
        let remote = MemoryRemote::with_page_size(2);
        remote.create_zone(ZONE).unwrap();
        for name in ["a", "b", "c"] {
            remote.save(ZONE, record(name, name.as_bytes())).unwrap();
        }

        let first = remote.changes_since(ZONE, None).unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.more_coming);

        let second = remote.changes_since(ZONE, Some(&first.token)).unwrap();
        let names: Vec<_> = second
            .records
            .into_iter()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["c"]);
        assert!(!second.more_coming);

        let empty = remote.changes_since(ZONE, Some(&second.token)).unwrap();
        assert!(empty.records.is_empty());
        assert_eq!(empty.token, second.token);
    }

    #[test]
    fn failure_injection() {
        let remote = MemoryRemote::new();
        remote.create_zone(ZONE).unwrap();

        remote.fail_next_save(RemoteError::Timeout);
        assert_eq!(remote.save(ZONE, record("a", b"1")), Err(RemoteError::Timeout));
        remote.save(ZONE, record("a", b"1")).unwrap();

        remote.fail_changes_after(Some(1));
        remote.changes_since(ZONE, None).unwrap();
        assert!(remote.changes_since(ZONE, None).unwrap_err().is_retryable());
        remote.fail_changes_after(None);

        remote.make_unreadable(ZONE, "a");
        let page = remote.changes_since(ZONE, None).unwrap();
        assert!(page.records[0].is_err());

        remote.set_connected(false);
        assert_eq!(remote.create_zone("x"), Err(RemoteError::NotConnected));
    }

    #[test]
    fn malformed_token_is_fatal() {
        let remote = MemoryRemote::new();
        remote.create_zone(ZONE).unwrap();
        let token = ChangeToken::from_bytes(vec![1, 2, 3]);
        assert!(!remote
            .changes_since(ZONE, Some(&token))
            .unwrap_err()
            .is_retryable());
    }

    #[test]
    fn delete_zone_drops_records() {
        let remote = MemoryRemote::new();
        remote.create_zone(ZONE).unwrap();
        remote.save(ZONE, record("a", b"1")).unwrap();
        remote.delete_zone(ZONE).unwrap();
        assert!(!remote.has_zone(ZONE));
        remote.delete_zone(ZONE).unwrap();
    }
}
