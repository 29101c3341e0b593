//! # csync remote
//!
//! Remote sync adapter for the csync commit graph.
//!
//! This crate provides:
//! - [`RemoteStore`]: zone-scoped record storage with a paged change stream
//! - [`MemoryRemote`]: in-memory store with failure injection for tests
//! - [`RemoteRecord`]: the CBOR record a changeset travels as
//! - [`CloudSync`]: push, fetch and sync against a remote zone
//!
//! ## Model
//!
//! Every node of the local graph becomes one record named after its id.
//! Push saves unpushed nodes and flags them; a save that conflicts with an
//! existing record counts as done, since node content never changes. Fetch
//! walks the zone's change stream from the saved token and inserts the nodes
//! it has not seen. Fetched nodes are only inserted, never applied: a later
//! [`csync_core::ChangesetStore::pull`] or merge decides what reaches the
//! local tables.
//!
//! ## Key Invariants
//!
//! - No network call runs inside a local transaction
//! - A fetched page and its change token commit together
//! - A node is flagged pushed only after the remote has it
//! - Push and fetch are safe to re-run after any failure

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod ledger;
mod record;
mod remote;
mod state;

pub use config::{RetryConfig, SyncConfig, DEFAULT_ZONE};
pub use error::{RecordError, RecordResult, RemoteError, RemoteResult, SyncError, SyncResult};
pub use record::{RemoteRecord, RECORD_TYPE, RECORD_VERSION};
pub use remote::{ChangeToken, ChangesPage, MemoryRemote, RemoteStore, DEFAULT_PAGE_SIZE};
pub use state::{CloudSync, FetchReport, SyncCycleResult, SyncState, SyncStats};
