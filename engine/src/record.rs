//! The record model.
//!
//! Records are opaque JSON objects. The engine only interprets three fields:
//! the server identifier (`id`, falling back to `_id`), the client identifier
//! `uuid`, and the freshness stamp `updatedAt`. Every other field is carried
//! through untouched.

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A replicated record: a JSON object with identity and freshness fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::BadRequest(format!(
                "record must be a JSON object, got {other}"
            ))),
        }
    }

    /// The server identifier: `id`, falling back to `_id`.
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").or_else(|| self.0.get("_id"))
    }

    /// The client identifier.
    pub fn uuid(&self) -> Option<&Value> {
        self.0.get("uuid")
    }

    /// Set the client identifier.
    pub fn set_uuid(&mut self, uuid: Value) {
        self.0.insert("uuid".into(), uuid);
    }

    /// The freshness stamp, when present and numeric.
    pub fn updated_at(&self) -> Option<Timestamp> {
        match self.0.get("updatedAt")? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as Timestamp)),
            _ => None,
        }
    }

    /// Overwrite the freshness stamp.
    pub fn set_updated_at(&mut self, at: Timestamp) {
        self.0.insert("updatedAt".into(), Value::from(at));
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Write a field.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Fold the fields of `patch` over this record, overwriting on collision.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in patch.0.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Whether this record's server identifier equals `id`.
    pub fn has_server_id(&self, id: &Value) -> bool {
        self.id() == Some(id)
    }

    /// Whether this record's client identifier equals `uuid`.
    pub fn has_uuid(&self, uuid: &Value) -> bool {
        self.uuid() == Some(uuid)
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
