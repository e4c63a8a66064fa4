use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tables::TableName;

/// A row of the local mirror. `data` is the full record as the remote store
/// returns it and always carries the record's `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorRecord {
    pub table_name: TableName,
    pub record_id: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Extract the primary key of a remote row. Numeric ids are kept as their
/// decimal string.
pub fn record_id_of(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Make sure a create/update payload is an object whose `id` is `record_id`.
pub fn with_record_id(data: Value, record_id: &str) -> Result<Value, String> {
    match data {
        Value::Object(mut fields) => {
            fields.insert("id".to_string(), Value::String(record_id.to_string()));
            Ok(Value::Object(fields))
        }
        Value::Null => Ok(serde_json::json!({ "id": record_id })),
        other => Err(format!(
            "Record payload for {} must be a JSON object, got {}",
            record_id, other
        )),
    }
}
