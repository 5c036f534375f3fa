use std::collections::BTreeMap;
use std::fmt;

use crate::error::ApiError;
use crate::schema::Schema;
use crate::value::Value;

/// Record key. Opaque to the engine and never rewritten by migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(k) => write!(f, "{k}"),
            RecordKey::Str(k) => write!(f, "{k}"),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(k: i64) -> Self {
        RecordKey::Int(k)
    }
}

impl From<&str> for RecordKey {
    fn from(k: &str) -> Self {
        RecordKey::Str(k.to_string())
    }
}

/// Logical (decoded) record: field name → value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field set.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build a record from a JSON object, converting each field per `schema`.
    ///
    /// Fields the schema does not declare are rejected.
    pub fn from_json(schema: &Schema, json: &serde_json::Value) -> Result<Self, ApiError> {
        let obj = json
            .as_object()
            .ok_or_else(|| ApiError::format(format!("expected JSON object for '{}'", schema.type_name)))?;
        let mut record = Record::new();
        for (name, raw) in obj {
            let def = schema.get(name).ok_or_else(|| {
                ApiError::schema(format!("field '{name}' not declared by '{}'", schema.type_name))
            })?;
            let value = Value::from_json(def.kind, raw).map_err(|e| e.with_context(name))?;
            record.set(name.clone(), value);
        }
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Stored entry: key plus the encoded value blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub value: Vec<u8>,
}

/// One change-journal entry. `value = None` is a tombstone (delete).
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEvent {
    /// Journal-wide sequence, strictly increasing.
    pub sequence: u64,
    pub key: RecordKey,
    pub value: Option<Vec<u8>>,
    /// Ingestion timestamp in milliseconds (Unix epoch).
    pub ingestion_ms: i64,
}

impl JournalEvent {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Current time in milliseconds since Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldKind};

    fn order_schema() -> Schema {
        Schema::new("com.acme.Order", 1)
            .field(FieldDef::required("id", FieldKind::Int64))
            .field(FieldDef::required("amount", FieldKind::Decimal))
            .field(FieldDef::required("status", FieldKind::String))
    }

    #[test]
    fn json_round_trip() {
        let json = serde_json::json!({"id": 1, "amount": "100.00", "status": "pending"});
        let record = Record::from_json(&order_schema(), &json).unwrap();
        assert_eq!(record.get("amount"), Some(&Value::Decimal(10000, 2)));
        assert_eq!(record.to_json(), json);
    }

    #[test]
    fn json_rejects_undeclared_field() {
        let json = serde_json::json!({"id": 1, "colour": "red"});
        let err = Record::from_json(&order_schema(), &json).unwrap_err();
        assert!(err.message.contains("colour"));
    }

    #[test]
    fn untagged_keys() {
        let keys: Vec<RecordKey> = serde_json::from_str(r#"[3, "abc"]"#).unwrap();
        assert_eq!(keys, vec![RecordKey::Int(3), RecordKey::from("abc")]);
    }
}
