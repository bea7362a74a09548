//! Product records
//!
//! A record is an open JSON object. Only a handful of fields mean anything to
//! the synchronizer (`source`, `sid`, `uid`, `status`); everything else is
//! carried through untouched and compared field by field during
//! reconciliation.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const FIELD_SOURCE: &str = "source";
pub const FIELD_SID: &str = "sid";
pub const FIELD_UID: &str = "uid";
pub const FIELD_STATUS: &str = "status";

/// Lifecycle status of a product record
///
/// Records are never deleted in place; deletion is a transition to
/// [`RecordStatus::Deleted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    New,
    Active,
    Discontinued,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "new",
            RecordStatus::Active => "active",
            RecordStatus::Discontinued => "discontinued",
            RecordStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(RecordStatus::New),
            "active" => Ok(RecordStatus::Active),
            "discontinued" => Ok(RecordStatus::Discontinued),
            "deleted" => Ok(RecordStatus::Deleted),
            other => Err(SyncError::invalid_record(format!("unknown status '{}'", other))),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a record within its source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source: String,
    pub sid: String,
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.sid)
    }
}

/// One product record, as an open JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.str_field(FIELD_SOURCE)
    }

    /// Source-local identifier; numeric sids are accepted and read as text
    pub fn sid(&self) -> Option<String> {
        match self.0.get(FIELD_SID)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.str_field(FIELD_UID)
    }

    /// Status if present and recognized
    pub fn status(&self) -> Option<RecordStatus> {
        self.str_field(FIELD_STATUS).and_then(|s| s.parse().ok())
    }

    pub fn set_status(&mut self, status: RecordStatus) {
        self.0
            .insert(FIELD_STATUS.to_string(), Value::String(status.as_str().to_string()));
    }

    /// `(source, sid)` if both are present and non-empty
    pub fn key(&self) -> Option<RecordKey> {
        let source = self.source().filter(|s| !s.is_empty())?;
        let sid = self.sid().filter(|s| !s.is_empty())?;
        Some(RecordKey {
            source: source.to_string(),
            sid,
        })
    }

    /// True when `field` is absent or holds a falsy value
    pub fn is_falsy(&self, field: &str) -> bool {
        self.0.get(field).is_none_or(is_falsy)
    }

    /// A short label for log lines
    pub fn label(&self) -> String {
        match self.key() {
            Some(key) => key.to_string(),
            None => self.uid().unwrap_or("<unkeyed>").to_string(),
        }
    }
}

impl TryFrom<Value> for Record {
    type Error = SyncError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(SyncError::invalid_record(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

/// Falsiness as feeds use it: null, false, 0, and "" carry no information
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse records from a downloader's JSON output
///
/// Accepts either a bare array of records or an object with a `products`
/// array, the shape the Unified Listing read API returns.
pub fn parse_records(value: Value) -> Result<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("products") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SyncError::invalid_record(
                    "expected an array of records or an object with a 'products' array",
                ))
            },
        },
        other => {
            return Err(SyncError::invalid_record(format!(
                "expected an array of records, found {}",
                json_kind(&other)
            )))
        },
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            Record::try_from(item)
                .map_err(|e| SyncError::invalid_record(format!("record {}: {}", index, e)))
        })
        .collect()
}

/// Read records from a JSON file
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let value: Value = serde_json::from_str(&contents)?;
    parse_records(value)
}
