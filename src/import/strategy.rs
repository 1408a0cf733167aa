// ABOUTME: Pure conflict resolution between an incoming row and the stored one
// ABOUTME: No I/O here; the importer looks rows up and applies the Resolution

use serde_json::Value as JsonValue;

use super::ConflictStrategy;
use crate::export::Record;

/// What the importer should do with one incoming record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Insert the row as given.
    Insert(Record),
    /// Replace the stored row with this full row (primary key included).
    Update(Record),
    /// Leave the stored row alone.
    Skip,
    /// Insert with freshly generated primary key values; key columns are
    /// removed from the row and must be filled in by the caller.
    InsertFresh(Record),
}

/// True when every primary key column is present and non-null in `record`.
pub fn has_usable_key(record: &Record, primary_key: &[String]) -> bool {
    !primary_key.is_empty()
        && primary_key
            .iter()
            .all(|col| record.get(col).map_or(false, |v| !v.is_null()))
}

/// Decide how `incoming` is applied given the row currently stored under its
/// primary key (`existing`, if any).
pub fn resolve(
    strategy: ConflictStrategy,
    incoming: &Record,
    existing: Option<&Record>,
    primary_key: &[String],
) -> Resolution {
    let existing = existing.filter(|_| has_usable_key(incoming, primary_key));

    match (strategy, existing) {
        (ConflictStrategy::Append, _) => fresh_insert(incoming, primary_key),
        (_, None) => Resolution::Insert(incoming.clone()),
        (ConflictStrategy::Skip, Some(_)) => Resolution::Skip,
        (ConflictStrategy::Overwrite, Some(existing)) => {
            let mut row = Record::new();
            for col in existing.keys() {
                let value = incoming.get(col).cloned().unwrap_or(JsonValue::Null);
                row.insert(col.clone(), value);
            }
            for (col, value) in incoming {
                row.entry(col.clone()).or_insert_with(|| value.clone());
            }
            Resolution::Update(row)
        }
        (ConflictStrategy::Merge, Some(existing)) => {
            let mut row = existing.clone();
            for (col, value) in incoming {
                if !value.is_null() {
                    row.insert(col.clone(), value.clone());
                }
            }
            Resolution::Update(row)
        }
    }
}

fn fresh_insert(incoming: &Record, primary_key: &[String]) -> Resolution {
    if primary_key.is_empty() {
        return Resolution::Insert(incoming.clone());
    }
    let mut fresh = incoming.clone();
    for col in primary_key {
        fresh.remove(col);
    }
    Resolution::InsertFresh(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn pk() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn test_absent_row_is_inserted_for_every_strategy() {
        let incoming = record(json!({"id": 1, "name": "Alice"}));
        for strategy in [
            ConflictStrategy::Skip,
            ConflictStrategy::Overwrite,
            ConflictStrategy::Merge,
        ] {
            assert_eq!(
                resolve(strategy, &incoming, None, &pk()),
                Resolution::Insert(incoming.clone())
            );
        }
    }

    #[test]
    fn test_skip_leaves_existing_row() {
        let incoming = record(json!({"id": 1, "name": "New"}));
        let existing = record(json!({"id": 1, "name": "Old"}));
        assert_eq!(
            resolve(ConflictStrategy::Skip, &incoming, Some(&existing), &pk()),
            Resolution::Skip
        );
    }

    #[test]
    fn test_overwrite_nulls_absent_columns() {
        let incoming = record(json!({"id": 1, "name": "New"}));
        let existing = record(json!({"id": 1, "name": "Old", "email": "old@example.com"}));

        let resolution = resolve(ConflictStrategy::Overwrite, &incoming, Some(&existing), &pk());
        assert_eq!(
            resolution,
            Resolution::Update(record(json!({"id": 1, "name": "New", "email": null})))
        );
    }

    #[test]
    fn test_merge_keeps_existing_when_incoming_is_null_or_absent() {
        let incoming = record(json!({"id": 1, "name": null, "age": 31}));
        let existing = record(json!({
            "id": 1,
            "name": "Alice",
            "email": "alice@example.com",
            "age": 30
        }));

        let resolution = resolve(ConflictStrategy::Merge, &incoming, Some(&existing), &pk());
        assert_eq!(
            resolution,
            Resolution::Update(record(json!({
                "id": 1,
                "name": "Alice",
                "email": "alice@example.com",
                "age": 31
            })))
        );
    }

    #[test]
    fn test_append_strips_primary_key() {
        let incoming = record(json!({"id": 1, "name": "Alice"}));
        let existing = record(json!({"id": 1, "name": "Alice"}));

        for stored in [None, Some(&existing)] {
            assert_eq!(
                resolve(ConflictStrategy::Append, &incoming, stored, &pk()),
                Resolution::InsertFresh(record(json!({"name": "Alice"})))
            );
        }
    }

    #[test]
    fn test_append_without_primary_key_inserts_as_is() {
        let incoming = record(json!({"message": "hello"}));
        assert_eq!(
            resolve(ConflictStrategy::Append, &incoming, None, &[]),
            Resolution::Insert(incoming.clone())
        );
    }

    #[test]
    fn test_missing_key_value_is_inserted() {
        let incoming = record(json!({"name": "Anonymous"}));
        let existing = record(json!({"id": 1, "name": "Alice"}));
        assert_eq!(
            resolve(ConflictStrategy::Skip, &incoming, Some(&existing), &pk()),
            Resolution::Insert(incoming.clone())
        );
    }

    #[test]
    fn test_has_usable_key() {
        let composite = vec!["order_id".to_string(), "item_id".to_string()];
        assert!(has_usable_key(
            &record(json!({"order_id": 1, "item_id": 2})),
            &composite
        ));
        assert!(!has_usable_key(
            &record(json!({"order_id": 1, "item_id": null})),
            &composite
        ));
        assert!(!has_usable_key(&record(json!({"order_id": 1})), &composite));
        assert!(!has_usable_key(&record(json!({"x": 1})), &[]));
    }
}
