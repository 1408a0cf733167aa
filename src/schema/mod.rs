// ABOUTME: Table schema descriptors and the deny-list of non-transferable tables
// ABOUTME: TableSchema is the data both introspection and table creation work from

pub mod inspector;

pub use inspector::SchemaInspector;

use serde::{Deserialize, Serialize};

/// One column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type, e.g. `INTEGER`, `TEXT`, `TIMESTAMP`. May be empty.
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Default expression as SQL text, if any.
    pub default: Option<String>,
}

/// Structural snapshot of a table, sufficient to recreate it elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    /// Primary key columns in key order; empty when the table has none.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// True for a single `INTEGER` primary key, which SQLite makes a rowid alias.
    pub fn has_rowid_alias_key(&self) -> bool {
        match self.primary_key.as_slice() {
            [pk] => self
                .column(pk)
                .map(|c| c.data_type.eq_ignore_ascii_case("INTEGER"))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// A table offered for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub estimated_count: u64,
}

/// Explicit table names and name prefixes that are never listed or exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyList {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl DenyList {
    pub fn new(names: Vec<String>, prefixes: Vec<String>) -> Self {
        Self { names, prefixes }
    }

    /// A deny-list that only hides SQLite's own `sqlite_*` tables.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_denied(&self, table: &str) -> bool {
        // SQLite internals are never transferable, whatever the configuration says.
        if table.starts_with("sqlite_") {
            return true;
        }
        self.names.iter().any(|n| n == table)
            || self.prefixes.iter().any(|p| table.starts_with(p.as_str()))
    }
}

impl Default for DenyList {
    /// Schema-version, job-queue, and session/auth-token tables.
    fn default() -> Self {
        let names = [
            "schema_migrations",
            "ar_internal_metadata",
            "__diesel_schema_migrations",
            "_sqlx_migrations",
            "refinery_schema_history",
            "seaql_migrations",
            "import_jobs",
            "oban_jobs",
            "oban_peers",
            "users_tokens",
            "sessions",
        ];
        let prefixes = ["sqlite_", "oban_", "_litestream"];
        Self::new(
            names.iter().map(|s| s.to_string()).collect(),
            prefixes.iter().map(|s| s.to_string()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deny_list_covers_internal_tables() {
        let deny = DenyList::default();
        assert!(deny.is_denied("schema_migrations"));
        assert!(deny.is_denied("oban_jobs"));
        assert!(deny.is_denied("oban_producers"));
        assert!(deny.is_denied("users_tokens"));
        assert!(deny.is_denied("sqlite_sequence"));
        assert!(!deny.is_denied("users"));
        assert!(!deny.is_denied("migrations_log"));
    }

    #[test]
    fn test_empty_deny_list_still_hides_sqlite_internals() {
        let deny = DenyList::empty();
        assert!(deny.is_denied("sqlite_stat1"));
        assert!(!deny.is_denied("schema_migrations"));
    }

    #[test]
    fn test_rowid_alias_detection() {
        let schema = TableSchema {
            table: "users".to_string(),
            columns: vec![ColumnDef {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                nullable: true,
                default: None,
            }],
            primary_key: vec!["id".to_string()],
        };
        assert!(schema.has_rowid_alias_key());

        let composite = TableSchema {
            primary_key: vec!["id".to_string(), "other".to_string()],
            ..schema.clone()
        };
        assert!(!composite.has_rowid_alias_key());
    }

    #[test]
    fn test_column_def_wire_name_is_type() {
        let col = ColumnDef {
            name: "email".to_string(),
            data_type: "TEXT".to_string(),
            nullable: true,
            default: None,
        };
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "TEXT");
    }
}
