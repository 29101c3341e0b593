//! # csync codec
//!
//! Owned binary deltas in the SQLite changeset format.
//!
//! A [`Delta`] is the set of row operations observed during one write
//! transaction. This crate captures deltas from a live connection, decodes
//! them into typed [`Operation`]s, encodes operations back into deltas,
//! combines chains of deltas into one and applies deltas with an
//! omit-on-conflict policy.
//!
//! ## Usage
//!
//! ```
//! use csync_codec::{Delta, DeltaCapture};
//! use rusqlite::Connection;
//!
//! let source = Connection::open_in_memory().unwrap();
//! source.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)").unwrap();
//!
//! let capture = DeltaCapture::start(&source).unwrap();
//! source.execute("INSERT INTO kv VALUES ('a', '1')", []).unwrap();
//! let delta = capture.finish().unwrap();
//!
//! let target = Connection::open_in_memory().unwrap();
//! target.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)").unwrap();
//! let report = delta.apply(&target).unwrap();
//! assert_eq!(report.operations, 1);
//! assert_eq!(report.conflicts, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod decoder;
mod delta;
mod encoder;
mod error;
mod operation;
mod value;
pub mod varint;

pub use capture::{is_captured_table, DeltaCapture, INTERNAL_TABLE_PREFIX};
pub use decoder::{decode_all, ChangesetDecoder};
pub use delta::{ApplyReport, Delta};
pub use encoder::{encode, ChangesetEncoder};
pub use error::{CodecError, CodecResult};
pub use operation::{Operation, OperationKind};
pub use value::Value;
