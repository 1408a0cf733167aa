// ABOUTME: Conflict-aware import of exported rows into the receiver's database
// ABOUTME: Defines ConflictStrategy, TransferResult, and per-record errors

pub mod importer;
pub mod strategy;

pub use importer::DataImporter;
pub use strategy::{resolve, Resolution};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What to do when an incoming row matches an existing primary key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Keep the existing row.
    #[default]
    Skip,
    /// Replace every column; columns missing from the incoming row become NULL.
    Overwrite,
    /// Take incoming non-null values, keep existing ones otherwise.
    Merge,
    /// Always insert, with a fresh primary key.
    Append,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Skip => "skip",
            ConflictStrategy::Overwrite => "overwrite",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Append => "append",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictStrategy::Skip),
            "overwrite" => Ok(ConflictStrategy::Overwrite),
            "merge" => Ok(ConflictStrategy::Merge),
            "append" => Ok(ConflictStrategy::Append),
            other => Err(format!(
                "unknown conflict strategy '{}' (expected skip, overwrite, merge or append)",
                other
            )),
        }
    }
}

/// A record that could not be imported, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub record: serde_json::Value,
    pub reason: String,
}

/// Outcome counts for one or more imported batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<RecordError>,
}

impl TransferResult {
    /// Fold another result into this one.
    pub fn merge(&mut self, other: TransferResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    /// Rows that reached a decision, successful or not.
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.skipped + self.errors.len() as u64
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("skip".parse::<ConflictStrategy>(), Ok(ConflictStrategy::Skip));
        assert_eq!("MERGE".parse::<ConflictStrategy>(), Ok(ConflictStrategy::Merge));
        assert!("upsert".parse::<ConflictStrategy>().is_err());
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Skip);
        assert_eq!(ConflictStrategy::Overwrite.to_string(), "overwrite");
    }

    #[test]
    fn test_strategy_serde_is_lowercase() {
        let encoded = serde_json::to_string(&ConflictStrategy::Append).unwrap();
        assert_eq!(encoded, "\"append\"");
        let decoded: ConflictStrategy = serde_json::from_str("\"overwrite\"").unwrap();
        assert_eq!(decoded, ConflictStrategy::Overwrite);
    }

    #[test]
    fn test_result_merge() {
        let mut total = TransferResult {
            created: 2,
            updated: 1,
            skipped: 0,
            errors: vec![],
        };
        total.merge(TransferResult {
            created: 1,
            updated: 0,
            skipped: 3,
            errors: vec![RecordError {
                record: json!({"id": 9}),
                reason: "UNIQUE constraint failed".to_string(),
            }],
        });

        assert_eq!(total.created, 3);
        assert_eq!(total.updated, 1);
        assert_eq!(total.skipped, 3);
        assert_eq!(total.errors.len(), 1);
        assert_eq!(total.processed(), 8);
        assert!(!total.is_clean());
    }
}
