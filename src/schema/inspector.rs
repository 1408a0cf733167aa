// ABOUTME: SQLite catalog introspection for transferable tables
// ABOUTME: Lists tables, reads column/primary-key definitions, and counts rows

use rusqlite::{Connection, OptionalExtension};

use super::{ColumnDef, DenyList, TableInfo, TableSchema};
use crate::error::{Result, TransferError};
use crate::utils::{quote_ident, validate_identifier};

/// Reads table metadata from a SQLite connection.
///
/// Tables on the deny-list behave as if they did not exist: they are not
/// listed and `get_schema` reports them as not found.
pub struct SchemaInspector<'a> {
    conn: &'a Connection,
    deny_list: DenyList,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(conn: &'a Connection, deny_list: DenyList) -> Self {
        Self { conn, deny_list }
    }

    /// Inspector for the receiver's own database, where only SQLite internals are hidden.
    pub fn local(conn: &'a Connection) -> Self {
        Self::new(conn, DenyList::empty())
    }

    /// List transferable tables, sorted by name, with their row counts.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        tracing::debug!("Listing tables from SQLite database");

        // SQLite internals are filtered by the deny-list, which always hides `sqlite_*`
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            if self.deny_list.is_denied(&name) {
                continue;
            }
            if validate_identifier(&name).is_err() {
                tracing::debug!(
                    "Skipping table '{}': name is not a plain identifier",
                    crate::utils::sanitize_identifier(&name)
                );
                continue;
            }
            let estimated_count = self.count_rows(&name)?;
            tables.push(TableInfo {
                name,
                estimated_count,
            });
        }

        tracing::info!("Found {} transferable tables", tables.len());
        Ok(tables)
    }

    /// Column definitions and primary key for `table`.
    pub fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.ensure_visible(table)?;

        let query = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&query)?;

        // (cid, name, type, notnull, dflt_value, pk)
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, i64>(3)? != 0,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Err(TransferError::TableNotFound(table.to_string()));
        }

        let mut pk_positions: Vec<(i64, String)> = Vec::new();
        let mut columns = Vec::with_capacity(rows.len());
        for (name, data_type, not_null, default, pk) in rows {
            if pk > 0 {
                pk_positions.push((pk, name.clone()));
            }
            columns.push(ColumnDef {
                name,
                data_type,
                nullable: !not_null,
                default,
            });
        }
        pk_positions.sort_by_key(|(pos, _)| *pos);

        Ok(TableSchema {
            table: table.to_string(),
            columns,
            primary_key: pk_positions.into_iter().map(|(_, name)| name).collect(),
        })
    }

    /// Row count for `table`. Exact for SQLite, but callers should only rely
    /// on it being a non-negative estimate.
    pub fn get_count(&self, table: &str) -> Result<u64> {
        self.ensure_visible(table)?;
        self.count_rows(table)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        validate_identifier(table)?;
        if self.deny_list.is_denied(table) {
            return Ok(false);
        }
        self.exists_in_catalog(table)
    }

    pub fn deny_list(&self) -> &DenyList {
        &self.deny_list
    }

    /// Validate the name and make sure it names a visible, existing table.
    fn ensure_visible(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        if self.deny_list.is_denied(table) || !self.exists_in_catalog(table)? {
            return Err(TransferError::TableNotFound(table.to_string()));
        }
        Ok(())
    }

    fn exists_in_catalog(&self, table: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        // Note: table name is validated by every caller, so it's safe to use in SQL
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> (tempfile::TempDir, std::path::PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT DEFAULT 'none',
                age INTEGER
            );
            CREATE TABLE order_items (
                item_id INTEGER NOT NULL,
                order_id INTEGER NOT NULL,
                quantity INTEGER DEFAULT 1,
                PRIMARY KEY (order_id, item_id)
            );
            CREATE TABLE schema_migrations (version TEXT PRIMARY KEY);
            CREATE TABLE oban_jobs (id INTEGER PRIMARY KEY);
            CREATE TABLE seq_test (id INTEGER PRIMARY KEY AUTOINCREMENT);
            CREATE TABLE sqlitebrowser_notes (note TEXT);
            INSERT INTO users (id, name, email, age) VALUES (1, 'Alice', 'alice@example.com', 30);
            INSERT INTO users (id, name, email, age) VALUES (2, 'Bob', 'bob@example.com', 25);
            INSERT INTO users (id, name) VALUES (3, 'Charlie');
            INSERT INTO schema_migrations VALUES ('20240101');",
        )
        .unwrap();

        (temp_dir, db_path)
    }

    #[test]
    fn test_list_tables_excludes_deny_list_and_internals() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::new(&conn, DenyList::default());

        let tables = inspector.list_tables().unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["order_items", "seq_test", "sqlitebrowser_notes", "users"]
        );
        assert!(!names.iter().any(|n| n.starts_with("sqlite_")));
        assert_eq!(tables[3].estimated_count, 3);
    }

    #[test]
    fn test_list_tables_never_returns_denied_names() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let deny = DenyList::new(vec!["users".to_string()], vec!["order_".to_string()]);
        let inspector = SchemaInspector::new(&conn, deny.clone());

        for table in inspector.list_tables().unwrap() {
            assert!(!deny.is_denied(&table.name), "{}", table.name);
        }
    }

    #[test]
    fn test_get_schema_reads_columns() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::local(&conn);

        let schema = inspector.get_schema("users").unwrap();
        assert_eq!(schema.table, "users");
        assert_eq!(schema.column_names(), vec!["id", "name", "email", "age"]);
        assert_eq!(schema.primary_key, vec!["id"]);

        let name = schema.column("name").unwrap();
        assert!(!name.nullable);
        assert_eq!(name.data_type, "TEXT");

        let email = schema.column("email").unwrap();
        assert_eq!(email.default.as_deref(), Some("'none'"));
    }

    #[test]
    fn test_get_schema_composite_key_in_key_order() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::local(&conn);

        let schema = inspector.get_schema("order_items").unwrap();
        assert_eq!(schema.primary_key, vec!["order_id", "item_id"]);
    }

    #[test]
    fn test_get_schema_missing_and_denied_tables() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::new(&conn, DenyList::default());

        assert_eq!(
            inspector.get_schema("ghosts").unwrap_err(),
            TransferError::TableNotFound("ghosts".to_string())
        );
        assert_eq!(
            inspector.get_schema("schema_migrations").unwrap_err(),
            TransferError::TableNotFound("schema_migrations".to_string())
        );
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::local(&conn);

        let err = inspector.get_count("users; DROP TABLE users;").unwrap_err();
        assert!(matches!(err, TransferError::InvalidIdentifier(_)));
        assert!(inspector.table_exists("users").unwrap());
    }

    #[test]
    fn test_get_count_and_exists() {
        let (_temp_dir, db_path) = create_test_db();
        let conn = Connection::open(db_path).unwrap();
        let inspector = SchemaInspector::new(&conn, DenyList::default());

        assert_eq!(inspector.get_count("users").unwrap(), 3);
        assert_eq!(inspector.get_count("order_items").unwrap(), 0);
        assert!(inspector.table_exists("users").unwrap());
        assert!(!inspector.table_exists("nope").unwrap());
        assert!(!inspector.table_exists("schema_migrations").unwrap());
    }
}
