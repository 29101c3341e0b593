//! Remote record format.
//!
//! A changeset travels as one record named after its id. The body is a CBOR
//! map with named fields:
//!
//! | key            | CBOR type         |
//! |----------------|-------------------|
//! | `type`         | text `Changeset`  |
//! | `version`      | unsigned          |
//! | `id`           | text              |
//! | `parent_id`    | text or null      |
//! | `parent_delta` | bytes             |
//! | `merge_id`     | text or null      |
//! | `merge_delta`  | bytes or null     |
//! | `meta`         | text (JSON)       |
//!
//! The `pushed` flag is local state and never leaves the device.

use crate::error::{RecordError, RecordResult};
use ciborium::value::Value;
use csync_core::{Changeset, ChangesetId, CoreError, Delta};
use sha2::{Digest, Sha256};

/// Record type tag.
pub const RECORD_TYPE: &str = "Changeset";

/// Current body format version.
pub const RECORD_VERSION: u64 = 1;

/// A named record as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Record name, unique within a zone.
    pub name: String,
    /// Encoded body.
    pub body: Vec<u8>,
}

impl RemoteRecord {
    /// Creates a record.
    pub fn new(name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// SHA-256 of the body.
    pub fn content_hash(&self) -> [u8; 32] {
        Sha256::digest(&self.body).into()
    }

    /// Encodes a node.
    ///
    /// # Errors
    ///
    /// Fails only if meta cannot be serialized.
    pub fn from_changeset(node: &Changeset) -> RecordResult<Self> {
        let optional_id = |id: Option<ChangesetId>| {
            id.map_or(Value::Null, |id| Value::Text(id.to_string()))
        };
        let body = Value::Map(vec![
            (text("type"), text(RECORD_TYPE)),
            (text("version"), Value::Integer(RECORD_VERSION.into())),
            (text("id"), Value::Text(node.id.to_string())),
            (text("parent_id"), optional_id(node.parent_id)),
            (
                text("parent_delta"),
                Value::Bytes(node.parent_delta.as_bytes().to_vec()),
            ),
            (text("merge_id"), optional_id(node.merge_id)),
            (
                text("merge_delta"),
                node.merge_delta
                    .as_ref()
                    .map_or(Value::Null, |d| Value::Bytes(d.as_bytes().to_vec())),
            ),
            (text("meta"), Value::Text(serde_json::to_string(&node.meta)?)),
        ]);

        let mut bytes = Vec::new();
        ciborium::into_writer(&body, &mut bytes).map_err(|e| RecordError::Cbor(e.to_string()))?;
        Ok(Self::new(node.id.to_string(), bytes))
    }

    /// Decodes the body into a node.
    ///
    /// The node comes back with `pushed` set, since it exists remotely.
    /// Missing meta decodes as an empty JSON object.
    ///
    /// # Errors
    ///
    /// Returns a record error if the body is not a well-formed changeset
    /// record or names a different id than the record.
    pub fn to_changeset(&self) -> RecordResult<Changeset> {
        let value: Value = ciborium::from_reader(self.body.as_slice())
            .map_err(|e| RecordError::Cbor(e.to_string()))?;
        let Value::Map(entries) = value else {
            return Err(RecordError::Cbor("body is not a map".into()));
        };
        let fields = Fields(entries);

        match fields.get("type") {
            Some(Value::Text(kind)) if kind == RECORD_TYPE => {}
            Some(_) => return Err(RecordError::invalid("type", "not a changeset record")),
            None => return Err(RecordError::MissingField("type")),
        }
        let version = fields.unsigned("version")?;
        if version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        let id = fields.id("id")?.ok_or(RecordError::MissingField("id"))?;
        if id.to_string() != self.name {
            return Err(RecordError::NameMismatch {
                name: self.name.clone(),
                id: id.to_string(),
            });
        }

        let meta = match fields.get("meta") {
            None | Some(Value::Null) => serde_json::Value::Object(serde_json::Map::new()),
            Some(Value::Text(json)) => serde_json::from_str(json)?,
            Some(_) => return Err(RecordError::invalid("meta", "expected text")),
        };

        let node = Changeset {
            id,
            parent_id: fields.id("parent_id")?,
            parent_delta: fields
                .delta("parent_delta")?
                .ok_or(RecordError::MissingField("parent_delta"))?,
            merge_id: fields.id("merge_id")?,
            merge_delta: fields.delta("merge_delta")?,
            pushed: true,
            meta,
        };
        node.validate()?;
        Ok(node)
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

struct Fields(Vec<(Value, Value)>);

impl Fields {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find_map(|(k, v)| match k {
            Value::Text(name) if name == key => Some(v),
            _ => None,
        })
    }

    fn unsigned(&self, field: &'static str) -> RecordResult<u64> {
        match self.get(field) {
            Some(Value::Integer(n)) => {
                u64::try_from(*n).map_err(|_| RecordError::invalid(field, "out of range"))
            }
            Some(_) => Err(RecordError::invalid(field, "expected an unsigned integer")),
            None => Err(RecordError::MissingField(field)),
        }
    }

    fn id(&self, field: &'static str) -> RecordResult<Option<ChangesetId>> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => s
                .parse::<ChangesetId>()
                .map(Some)
                .map_err(|e| RecordError::invalid(field, e.to_string())),
            Some(_) => Err(RecordError::invalid(field, "expected text")),
        }
    }

    fn delta(&self, field: &'static str) -> RecordResult<Option<Delta>> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bytes(bytes)) => Delta::from_bytes(bytes.clone())
                .map(Some)
                .map_err(|e| RecordError::Changeset(CoreError::from(e))),
            Some(_) => Err(RecordError::invalid(field, "expected bytes")),
        }
    }
}
