// ABOUTME: Offset-paginated export of table rows in primary-key order
// ABOUTME: Reads limit+1 rows to decide has_more without a second COUNT query

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use super::converter::{sql_to_json, ColumnKind};
use super::{Record, RecordBatch, MAX_PAGE_SIZE};
use crate::error::Result;
use crate::schema::{DenyList, SchemaInspector};
use crate::utils::{quote_ident, quote_ident_list};

/// Pages rows out of the sender's database.
///
/// Honors the same deny-list as the inspector it wraps, so a table hidden
/// from listing can not be read by name either.
pub struct DataExporter<'a> {
    conn: &'a Connection,
    inspector: SchemaInspector<'a>,
}

impl<'a> DataExporter<'a> {
    pub fn new(conn: &'a Connection, deny_list: DenyList) -> Self {
        Self {
            conn,
            inspector: SchemaInspector::new(conn, deny_list),
        }
    }

    /// Read one page of `table` starting at `offset`.
    ///
    /// Rows are ordered by primary key ascending, or by rowid when the table
    /// has no primary key, so consecutive pages over an unchanged table
    /// neither repeat nor skip rows. `limit` is clamped to `1..=10_000`.
    pub fn export_records(&self, table: &str, limit: u32, offset: u64) -> Result<RecordBatch> {
        let schema = self.inspector.get_schema(table)?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let order_by = if schema.primary_key.is_empty() {
            "rowid".to_string()
        } else {
            quote_ident_list(&schema.primary_key)
        };

        let columns = schema.column_names();
        let query = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
            quote_ident_list(&columns),
            quote_ident(table),
            order_by
        );

        let kinds: Vec<ColumnKind> = schema
            .columns
            .iter()
            .map(|c| ColumnKind::from_declared(&c.data_type))
            .collect();

        tracing::debug!(
            "Exporting '{}' limit={} offset={}",
            table,
            limit,
            offset
        );

        let mut stmt = self.conn.prepare(&query)?;
        let fetch = i64::from(limit) + 1;
        let offset_param = i64::try_from(offset).unwrap_or(i64::MAX);

        let mut records: Vec<Record> = stmt
            .query_map(rusqlite::params![fetch, offset_param], |row| {
                let mut record = Record::new();
                for (idx, name) in columns.iter().enumerate() {
                    let value: SqlValue = row.get(idx)?;
                    record.insert(name.clone(), sql_to_json(&value, kinds[idx]));
                }
                Ok(record)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_more = records.len() > limit as usize;
        records.truncate(limit as usize);

        Ok(RecordBatch {
            records,
            has_more,
            offset,
        })
    }

    pub fn inspector(&self) -> &SchemaInspector<'a> {
        &self.inspector
    }
}
