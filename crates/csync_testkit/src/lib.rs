//! # csync testkit
//!
//! Test utilities for csync.
//!
//! This crate provides:
//! - Test devices: a `player` table over a changeset store
//! - Property-based test generators using proptest
//! - Multi-device convergence helpers
//! - Fuzz testing harnesses
//! - Wire-format test vectors for deltas
//!
//! ## Usage
//!
//! ```rust,ignore
//! use csync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_device() {
//!     with_device(|device| {
//!         device.add_player("p1", "Ana", 3);
//!         assert_eq!(device.players().len(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use vectors::*;
