// ABOUTME: Paginated record export and the transport-safe record representation
// ABOUTME: Rows travel as JSON objects; pages as RecordBatch {records, has_more, offset}

pub mod converter;
pub mod exporter;

pub use exporter::DataExporter;

use serde::{Deserialize, Serialize};

/// One row: column name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Upper bound on rows per page, whatever the receiver asks for.
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// One page of exported rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    /// More rows exist past this page.
    pub has_more: bool,
    /// Offset of the first record in this page.
    pub offset: u64,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Offset to request for the following page.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.records.len() as u64
    }
}
