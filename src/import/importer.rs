// ABOUTME: DataImporter applies incoming record batches under a conflict strategy
// ABOUTME: Also creates missing destination tables from a peer-supplied TableSchema

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;

use super::strategy::{has_usable_key, resolve, Resolution};
use super::{ConflictStrategy, RecordError, TransferResult};
use crate::error::{Result, TransferError};
use crate::export::converter::{json_to_sql, sql_to_json, ColumnKind};
use crate::export::Record;
use crate::schema::{SchemaInspector, TableSchema};
use crate::utils::{quote_ident, quote_ident_list, sanitize_identifier, validate_identifier};

/// Writes records into the receiver's database.
pub struct DataImporter<'a> {
    conn: &'a Connection,
}

impl<'a> DataImporter<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Import a batch of records into `table`.
    ///
    /// Each record is looked up by primary key and resolved against the stored
    /// row according to `strategy`. A record that fails (not an object,
    /// unknown column, constraint violation) lands in `errors` and the batch
    /// carries on. The whole batch runs in one transaction.
    ///
    /// Returns `TableNotFound` if `table` does not exist locally.
    pub fn import_records(
        &self,
        table: &str,
        records: Vec<JsonValue>,
        strategy: ConflictStrategy,
    ) -> Result<TransferResult> {
        let schema = SchemaInspector::local(self.conn).get_schema(table)?;
        let mut result = TransferResult::default();

        if records.is_empty() {
            return Ok(result);
        }

        let tx = self.conn.unchecked_transaction()?;

        for value in records {
            match self.import_one(&schema, &value, strategy) {
                Ok(Outcome::Created) => result.created += 1,
                Ok(Outcome::Updated) => result.updated += 1,
                Ok(Outcome::Skipped) => result.skipped += 1,
                Err(reason) => {
                    tracing::debug!("Record rejected for '{}': {}", table, reason);
                    result.errors.push(RecordError {
                        record: value,
                        reason,
                    });
                }
            }
        }

        tx.commit()?;

        tracing::debug!(
            "Imported into '{}' ({}): created={} updated={} skipped={} errors={}",
            table,
            strategy,
            result.created,
            result.updated,
            result.skipped,
            result.errors.len()
        );

        Ok(result)
    }

    /// Create `table` from a peer-supplied schema if it does not already exist.
    ///
    /// Column names and types are validated; default expressions that are not
    /// plain literals are dropped with a warning.
    pub fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let sql = build_create_table(table, schema)?;
        tracing::debug!("Creating table: {}", sql);
        self.conn.execute(&sql, [])?;
        tracing::info!("Ensured table '{}' exists ({} columns)", table, schema.columns.len());
        Ok(())
    }

    fn import_one(
        &self,
        schema: &TableSchema,
        value: &JsonValue,
        strategy: ConflictStrategy,
    ) -> std::result::Result<Outcome, String> {
        let incoming = value
            .as_object()
            .ok_or_else(|| "record is not a JSON object".to_string())?;

        for column in incoming.keys() {
            validate_identifier(column).map_err(failure_reason)?;
            if schema.column(column).is_none() {
                return Err(format!(
                    "unknown column '{}' for table '{}'",
                    column, schema.table
                ));
            }
        }

        let existing = if has_usable_key(incoming, &schema.primary_key) {
            self.find_existing(schema, incoming)
                .map_err(failure_reason)?
        } else {
            None
        };

        let outcome = match resolve(strategy, incoming, existing.as_ref(), &schema.primary_key) {
            Resolution::Insert(row) => {
                self.insert_row(schema, &row).map_err(failure_reason)?;
                Outcome::Created
            }
            Resolution::InsertFresh(mut row) => {
                self.assign_fresh_key(schema, &mut row)
                    .map_err(failure_reason)?;
                self.insert_row(schema, &row).map_err(failure_reason)?;
                Outcome::Created
            }
            Resolution::Update(row) => {
                self.update_row(schema, &row).map_err(failure_reason)?;
                Outcome::Updated
            }
            Resolution::Skip => Outcome::Skipped,
        };

        Ok(outcome)
    }

    /// Stored row matching the incoming primary key, read without type coercion.
    fn find_existing(&self, schema: &TableSchema, incoming: &Record) -> Result<Option<Record>> {
        let columns = schema.column_names();
        let query = format!(
            "SELECT {} FROM {} WHERE {}",
            quote_ident_list(&columns),
            quote_ident(&schema.table),
            key_predicate(&schema.primary_key, 1)
        );
        let key_values = key_values(schema, incoming);

        let found = self
            .conn
            .query_row(&query, params_from_iter(key_values.iter()), |row| {
                let mut record = Record::new();
                for (idx, name) in columns.iter().enumerate() {
                    let value: SqlValue = row.get(idx)?;
                    record.insert(name.clone(), sql_to_json(&value, ColumnKind::Plain));
                }
                Ok(record)
            })
            .optional()?;

        Ok(found)
    }

    fn insert_row(&self, schema: &TableSchema, row: &Record) -> Result<()> {
        let table = &schema.table;
        if row.is_empty() {
            let query = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
            self.conn.execute(&query, [])?;
            return Ok(());
        }

        let columns: Vec<String> = row.keys().cloned().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let query = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            quote_ident_list(&columns),
            placeholders.join(", ")
        );
        let values: Vec<SqlValue> = row
            .iter()
            .map(|(col, value)| json_to_sql(value, column_kind(schema, col)))
            .collect();

        self.conn.execute(&query, params_from_iter(values.iter()))?;
        Ok(())
    }

    fn update_row(&self, schema: &TableSchema, row: &Record) -> Result<()> {
        let assignments: Vec<(&String, &JsonValue)> = row
            .iter()
            .filter(|(col, _)| !schema.primary_key.contains(*col))
            .collect();

        // Key-only tables have nothing left to change
        if assignments.is_empty() {
            return Ok(());
        }

        let set_clause: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", quote_ident(col), i + 1))
            .collect();
        let query = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(&schema.table),
            set_clause.join(", "),
            key_predicate(&schema.primary_key, assignments.len() + 1)
        );

        let mut values: Vec<SqlValue> = assignments
            .iter()
            .map(|(col, value)| json_to_sql(value, column_kind(schema, col)))
            .collect();
        values.extend(key_values(schema, row));

        self.conn.execute(&query, params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Fill primary key columns for an appended row.
    ///
    /// A single `INTEGER` key is left out so SQLite assigns the rowid. Other
    /// integer key columns get `MAX + 1`, anything else a UUID v4.
    fn assign_fresh_key(&self, schema: &TableSchema, row: &mut Record) -> Result<()> {
        if schema.has_rowid_alias_key() {
            return Ok(());
        }

        for col in &schema.primary_key {
            let declared = schema
                .column(col)
                .map(|c| c.data_type.to_ascii_uppercase())
                .unwrap_or_default();

            let fresh = if declared.contains("INT") {
                let query = format!(
                    "SELECT COALESCE(MAX({}), 0) + 1 FROM {}",
                    quote_ident(col),
                    quote_ident(&schema.table)
                );
                let next: i64 = self.conn.query_row(&query, [], |r| r.get(0))?;
                JsonValue::from(next)
            } else {
                JsonValue::String(uuid::Uuid::new_v4().to_string())
            };
            row.insert(col.clone(), fresh);
        }
        Ok(())
    }
}

/// Reason text for a rejected record; storage errors carry the SQLite message as is.
fn failure_reason(err: TransferError) -> String {
    match err {
        TransferError::Storage(message) => message,
        other => other.to_string(),
    }
}

enum Outcome {
    Created,
    Updated,
    Skipped,
}

/// `"a" = ?n AND "b" = ?n+1 ...` starting at placeholder `first`.
fn key_predicate(primary_key: &[String], first: usize) -> String {
    primary_key
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = ?{}", quote_ident(col), first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_values(schema: &TableSchema, record: &Record) -> Vec<SqlValue> {
    schema
        .primary_key
        .iter()
        .map(|col| {
            record
                .get(col)
                .map(|value| json_to_sql(value, column_kind(schema, col)))
                .unwrap_or(SqlValue::Null)
        })
        .collect()
}

/// Storage coercion for `column`, from its locally declared type.
fn column_kind(schema: &TableSchema, column: &str) -> ColumnKind {
    schema
        .column(column)
        .map(|c| ColumnKind::from_declared(&c.data_type))
        .unwrap_or(ColumnKind::Plain)
}

/// Build `CREATE TABLE IF NOT EXISTS` DDL for a peer-supplied schema.
///
/// Generates:
/// ```sql
/// CREATE TABLE IF NOT EXISTS "users" (
///   "id" INTEGER NOT NULL,
///   "name" TEXT DEFAULT 'anon',
///   PRIMARY KEY ("id")
/// )
/// ```
pub fn build_create_table(table: &str, schema: &TableSchema) -> Result<String> {
    validate_identifier(table)?;

    if schema.columns.is_empty() {
        return Err(TransferError::Protocol(format!(
            "schema for '{}' has no columns",
            table
        )));
    }

    let mut definitions = Vec::with_capacity(schema.columns.len() + 1);
    for column in &schema.columns {
        validate_identifier(&column.name)?;
        if !is_safe_type(&column.data_type) {
            return Err(TransferError::Protocol(format!(
                "column '{}' has unsupported type '{}'",
                column.name,
                sanitize_identifier(&column.data_type)
            )));
        }

        let mut definition = quote_ident(&column.name);
        if !column.data_type.trim().is_empty() {
            definition.push(' ');
            definition.push_str(column.data_type.trim());
        }
        if !column.nullable {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            if is_safe_default(default) {
                definition.push_str(" DEFAULT ");
                definition.push_str(default.trim());
            } else {
                tracing::warn!(
                    "Dropping default for column '{}.{}': '{}' is not a plain literal",
                    table,
                    column.name,
                    sanitize_identifier(default)
                );
            }
        }
        definitions.push(definition);
    }

    if !schema.primary_key.is_empty() {
        for col in &schema.primary_key {
            validate_identifier(col)?;
            if schema.column(col).is_none() {
                return Err(TransferError::Protocol(format!(
                    "primary key column '{}' is not a column of '{}'",
                    col, table
                )));
            }
        }
        definitions.push(format!("PRIMARY KEY ({})", quote_ident_list(&schema.primary_key)));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote_ident(table),
        definitions.join(",\n  ")
    ))
}

/// Declared types like `TEXT`, `VARCHAR(255)`, `DECIMAL(10, 2)`, `DOUBLE PRECISION`.
fn is_safe_type(data_type: &str) -> bool {
    let data_type = data_type.trim();
    if data_type.is_empty() {
        return true;
    }

    let (base, args) = match data_type.split_once('(') {
        Some((base, rest)) => match rest.strip_suffix(')') {
            Some(args) => (base.trim_end(), Some(args)),
            None => return false,
        },
        None => (data_type, None),
    };

    let base_ok = base.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');

    let args_ok = args.map_or(true, |args| {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        parts.len() <= 2
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    });

    base_ok && args_ok
}

/// Literal defaults only: numbers, quoted strings, NULL, booleans and the
/// CURRENT_* keywords, optionally wrapped in one pair of parentheses.
fn is_safe_default(default: &str) -> bool {
    let mut expr = default.trim();
    if let Some(inner) = expr.strip_prefix('(').and_then(|e| e.strip_suffix(')')) {
        expr = inner.trim();
    }

    const KEYWORDS: &[&str] = &[
        "NULL",
        "TRUE",
        "FALSE",
        "CURRENT_TIMESTAMP",
        "CURRENT_DATE",
        "CURRENT_TIME",
    ];
    if KEYWORDS.iter().any(|k| expr.eq_ignore_ascii_case(k)) {
        return true;
    }

    if !expr.is_empty()
        && expr
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && expr.parse::<f64>().is_ok()
    {
        return true;
    }

    is_quoted_literal(expr)
}

/// `'...'` where every embedded quote is doubled.
fn is_quoted_literal(expr: &str) -> bool {
    let Some(inner) = expr
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    else {
        return false;
    };
    if expr.len() < 2 {
        return false;
    }

    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.next() != Some('\'') {
            return false;
        }
    }
    true
}
