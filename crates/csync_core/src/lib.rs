//! # csync core
//!
//! Commit graph store and merge engine.
//!
//! Every local write runs through [`ChangesetStore::commit`], which captures
//! the rows it changed as a [`csync_codec::Delta`] and records it as a node
//! of a commit graph. A single head pointer names the node whose state the
//! local tables hold. [`ChangesetStore::pull`] walks head forward through
//! nodes received from elsewhere, and [`ChangesetStore::merge_all`] joins
//! divergent branches so that every replica can reach the same state.
//!
//! This crate provides:
//! - [`Database`]: single-writer SQLite handle with migrations and a change feed
//! - [`ChangesetStore`]: commit, pull, reset, insert and graph queries
//! - [`CommitGraph`]: in-memory ancestry traversal
//! - Merge engine: [`ChangesetStore::merge`], [`ChangesetStore::merge_all`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod changeset;
mod config;
mod database;
mod error;
mod graph;
mod id;
mod merge;
pub mod migration;
pub mod queries;
mod schema;
mod stats;
mod store;

pub use change_feed::{ChangeFeed, StoreEvent, StoreEventKind};
pub use changeset::{Changeset, Edge};
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use graph::{CommitGraph, Edges, GraphReport};
pub use id::ChangesetId;
pub use merge::{branch_only_deltas, merge_in, BranchDelta, MergeMeta};
pub use schema::ENGINE_SCHEMA;
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{insert_batch, ChangesetStore, Committed, PullReport, StoreReport};

/// Re-exported so callers need not depend on the codec crate directly.
pub use csync_codec::{ApplyReport, Delta};
