// ABOUTME: Conversion between SQLite values and transport-safe JSON
// ABOUTME: Coerces timestamps, UUID blobs, booleans, and JSON text by declared column type

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value as JsonValue};

/// How a declared column type steers value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Timestamp,
    Uuid,
    Json,
    Plain,
}

impl ColumnKind {
    /// Classify a declared SQLite type such as `TIMESTAMP` or `BINARY_ID`.
    pub fn from_declared(data_type: &str) -> Self {
        let upper = data_type.to_ascii_uppercase();
        if upper.starts_with("BOOL") {
            ColumnKind::Boolean
        } else if upper.contains("UUID") || upper.contains("BINARY_ID") {
            ColumnKind::Uuid
        } else if upper.contains("JSON") || upper == "MAP" {
            ColumnKind::Json
        } else if upper.contains("TIME") || upper == "DATE" {
            ColumnKind::Timestamp
        } else {
            ColumnKind::Plain
        }
    }
}

/// Convert a stored SQLite value into its wire form.
///
/// - INTEGER -> number (boolean in `BOOL*` columns, RFC 3339 in timestamp columns)
/// - REAL -> number (non-finite values become strings)
/// - TEXT -> string (ISO-8601 in timestamp columns, nested JSON in JSON columns)
/// - BLOB -> canonical UUID string for 16-byte UUID columns, otherwise
///   `{"_type": "blob", "data": "<base64>"}`
/// - NULL -> null
pub fn sql_to_json(value: &SqlValue, kind: ColumnKind) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,

        SqlValue::Integer(i) => match kind {
            ColumnKind::Boolean => JsonValue::Bool(*i != 0),
            ColumnKind::Timestamp => DateTime::from_timestamp(*i, 0)
                .map(|dt| JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .unwrap_or_else(|| JsonValue::Number((*i).into())),
            _ => JsonValue::Number((*i).into()),
        },

        SqlValue::Real(f) => {
            if f.is_finite() {
                serde_json::Number::from_f64(*f)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(f.to_string()))
            } else {
                // JSON has no NaN or Infinity
                JsonValue::String(f.to_string())
            }
        }

        SqlValue::Text(s) => match kind {
            ColumnKind::Timestamp => JsonValue::String(normalize_timestamp(s)),
            ColumnKind::Json => match serde_json::from_str::<JsonValue>(s) {
                Ok(nested @ (JsonValue::Object(_) | JsonValue::Array(_))) => nested,
                _ => JsonValue::String(s.clone()),
            },
            _ => JsonValue::String(s.clone()),
        },

        SqlValue::Blob(b) => {
            if kind == ColumnKind::Uuid {
                if let Ok(id) = uuid::Uuid::from_slice(b) {
                    return JsonValue::String(id.to_string());
                }
            }
            let encoded = base64::engine::general_purpose::STANDARD.encode(b);
            json!({
                "_type": "blob",
                "data": encoded
            })
        }
    }
}

/// Convert an incoming wire value into something SQLite can store.
///
/// Inverse of `sql_to_json` where the wire form is unambiguous: tagged blob
/// objects become BLOBs, booleans become 0/1, canonical UUID strings in UUID
/// columns become 16-byte BLOBs, and any other object or array is stored as
/// JSON text.
///
/// Timestamps stay text: an RFC 3339 string can not tell whether the sender
/// stored an epoch integer or a formatted date.
pub fn json_to_sql(value: &JsonValue, kind: ColumnKind) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                SqlValue::Text(n.to_string())
            }
        }
        JsonValue::String(s) => match kind {
            ColumnKind::Uuid => match uuid::Uuid::parse_str(s) {
                Ok(id) => SqlValue::Blob(id.as_bytes().to_vec()),
                Err(_) => SqlValue::Text(s.clone()),
            },
            _ => SqlValue::Text(s.clone()),
        },
        JsonValue::Object(map) => {
            if map.get("_type").and_then(JsonValue::as_str) == Some("blob") {
                if let Some(bytes) = map
                    .get("data")
                    .and_then(JsonValue::as_str)
                    .and_then(|d| base64::engine::general_purpose::STANDARD.decode(d).ok())
                {
                    return SqlValue::Blob(bytes);
                }
            }
            SqlValue::Text(value.to_string())
        }
        JsonValue::Array(_) => SqlValue::Text(value.to_string()),
    }
}

/// Rewrite SQLite's `YYYY-MM-DD HH:MM:SS[.fff]` as ISO-8601 with a `T`.
///
/// Values already in RFC 3339 are re-rendered canonically; anything that does
/// not parse (plain dates, free text) is passed through unchanged.
fn normalize_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        }
    }
    raw.to_string()
}
