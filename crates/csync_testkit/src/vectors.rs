//! Wire-format test vectors for changeset deltas.
//!
//! Each vector is a hex-encoded delta and either the number of operations it
//! decodes to or a fragment of the expected error message. Valid vectors are
//! in canonical form: re-encoding the decoded operations reproduces the
//! input byte for byte.

use serde::{Deserialize, Serialize};

/// A delta test vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Delta bytes (hex-encoded).
    pub input_hex: String,
    /// Number of operations the delta decodes to.
    pub operations: usize,
    /// Fragment of the expected error message (if this should fail).
    pub expected_error: Option<String>,
}

impl TestVector {
    fn valid(id: &str, description: &str, input_hex: &str, operations: usize) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            operations,
            expected_error: None,
        }
    }

    fn invalid(id: &str, description: &str, input_hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            operations: 0,
            expected_error: Some(error.into()),
        }
    }

    /// Decoded input bytes.
    pub fn input(&self) -> Vec<u8> {
        hex_decode(&self.input_hex)
    }
}

/// Well-formed deltas.
pub fn valid_delta_vectors() -> Vec<TestVector> {
    vec![
        TestVector::valid("empty", "Empty delta", "", 0),
        TestVector::valid(
            "insert",
            "INSERT t(1, 'ana')",
            "54020100740012000100000000000000010303616e61",
            1,
        ),
        TestVector::valid(
            "delete",
            "DELETE t(2, 'bob')",
            "54020100740009000100000000000000020303626f62",
            1,
        ),
        TestVector::valid(
            "update",
            "UPDATE t SET name 'ana' -> 'ali' WHERE id = 1",
            "54020100740017000100000000000000010303616e61000303616c69",
            1,
        ),
        TestVector::valid(
            "two_tables",
            "INSERT t(1, 'ana') then INSERT u(42)",
            "54020100740012000100000000000000010303616e615401017500120001000000000000002a",
            2,
        ),
        TestVector::valid(
            "value_types",
            "INSERT r(1, NULL, 1.5, x'beef')",
            "5404010000007200120001000000000000000105023ff80000000000000402beef",
            1,
        ),
        TestVector::valid(
            "indirect",
            "Indirect DELETE t(3, '')",
            "54020100740009010100000000000000030300",
            1,
        ),
    ]
}

/// Malformed deltas.
pub fn invalid_delta_vectors() -> Vec<TestVector> {
    vec![
        TestVector::invalid(
            "truncated_integer",
            "Integer value cut short",
            "54020100740012000100000000",
            "unexpected end",
        ),
        TestVector::invalid(
            "bad_opcode",
            "Operation code 7",
            "5402010074000700",
            "invalid operation code",
        ),
        TestVector::invalid(
            "bad_value_type",
            "Value type tag 9",
            "540201007400120009",
            "invalid value type",
        ),
        TestVector::invalid(
            "patchset",
            "Patchset table header",
            "500201007400",
            "patchsets",
        ),
        TestVector::invalid(
            "zero_columns",
            "Table header with no columns",
            "5400",
            "invalid changeset structure",
        ),
        TestVector::invalid(
            "record_before_header",
            "Change record without a table header",
            "1200010000000000000001",
            "invalid changeset structure",
        ),
        TestVector::invalid(
            "unterminated_name",
            "Table name without NUL",
            "5401017475",
            "unexpected end",
        ),
    ]
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        valid: valid_delta_vectors(),
        invalid: invalid_delta_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    valid: Vec<TestVector>,
    invalid: Vec<TestVector>,
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string.
///
/// # Panics
///
/// Panics on odd length or a non-hex digit.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd hex length");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex digit"))
        .collect()
}
