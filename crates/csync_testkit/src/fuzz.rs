//! Fuzz testing harnesses.
//!
//! These targets can be used with cargo-fuzz or other fuzzing frameworks.
//! Each one feeds arbitrary bytes to a decoder and checks that it either
//! succeeds or returns an error, never panics.

use csync_codec::{decode_all, encode, ChangesetDecoder, Delta};
use csync_core::{Changeset, ChangesetId, ChangesetStore, Database};
use serde_json::json;
use std::sync::Arc;

/// Fuzz target for delta decoding.
pub fn fuzz_delta_decode(data: &[u8]) {
    let _ = decode_all(data);
    // The lazy decoder must agree with the eager one.
    let lazy: Result<Vec<_>, _> = ChangesetDecoder::new(data).collect();
    assert_eq!(lazy.is_ok(), decode_all(data).is_ok());
}

/// Fuzz target for delta re-encoding.
///
/// A delta that decodes must re-encode to bytes that decode to the same
/// operations.
pub fn fuzz_delta_roundtrip(data: &[u8]) {
    if let Ok(ops) = decode_all(data) {
        if let Ok(encoded) = encode(&ops) {
            let decoded = decode_all(encoded.as_bytes()).expect("re-encoded delta must decode");
            assert_eq!(
                format!("{ops:?}"),
                format!("{decoded:?}"),
                "Roundtrip mismatch"
            );
        }
    }
}

/// Fuzz target for changeset id parsing.
pub fn fuzz_changeset_id(data: &[u8]) {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(id) = text.parse::<ChangesetId>() {
            assert_eq!(id.to_string().parse::<ChangesetId>().ok(), Some(id));
        }
    }
    if data.len() >= 16 {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&data[..16]);
        let id = ChangesetId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }
}

/// Fuzz target for inserting externally supplied nodes.
///
/// Arbitrary bytes become the delta of a root node; insertion and a pull must
/// fail cleanly or succeed, and the graph must stay valid.
pub fn fuzz_store_insert(data: &[u8]) {
    let Ok(delta) = Delta::from_bytes(data.to_vec()) else {
        return;
    };
    let Ok(db) = Database::open_in_memory() else {
        return;
    };
    let store = ChangesetStore::new(Arc::new(db));
    let node = Changeset::new(None, delta, json!({"fuzz": true}));
    if store.insert(vec![node]).is_ok() {
        let _ = store.pull();
        let report = store.verify().expect("verify must not fail");
        assert!(report.is_ok(), "graph invariants violated");
    }
}
