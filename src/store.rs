//! Read-only access to the editor's `state.vscdb` key-value databases.
//!
//! Every database holds an `ItemTable(key, value)` table and, in newer builds, a
//! `cursorDiskKV(key, value)` table. Values are JSON documents stored either as
//! TEXT or as BLOB depending on the writer, so both column types are accepted.
//!
//! A missing key, a missing table or an undecodable value are all normal outcomes
//! for this format: lookups return `None` and log at debug level instead of failing.

use eyre::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the database file inside each storage directory.
pub const DB_FILENAME: &str = "state.vscdb";

/// The tables this tool knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    ItemTable,
    CursorDiskKv,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::ItemTable => "ItemTable",
            Table::CursorDiskKv => "cursorDiskKV",
        }
    }
}

/// A read-only connection to one state database.
///
/// The connection is closed when the store is dropped.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    /// Open `path` read-only. Fails if the file is missing or is not a database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err_with(|| format!("Failed to open database: {}", path.display()))?;
        // Opening is lazy; touch the schema so a non-database file fails here.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .wrap_err_with(|| format!("Not a readable database: {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_table(&self, table: Table) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table.name()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .unwrap_or(false)
    }

    /// Names of all tables in the database.
    pub fn tables(&self) -> Vec<String> {
        let result = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .and_then(|mut stmt| {
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>();
                names
            });
        match result {
            Ok(names) => names,
            Err(e) => {
                debug!(db = %self.path.display(), "Failed to list tables: {e}");
                Vec::new()
            }
        }
    }

    /// Raw bytes stored under `key`, if any.
    pub fn raw(&self, table: Table, key: &str) -> Option<Vec<u8>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?1", table.name());
        let result = self
            .conn
            .query_row(&sql, [key], |row| Ok(value_bytes(row.get_ref(0)?)))
            .optional();
        match result {
            Ok(found) => found.flatten(),
            Err(e) => {
                debug!(db = %self.path.display(), table = table.name(), key, "Lookup failed: {e}");
                None
            }
        }
    }

    /// JSON value stored under `key`.
    ///
    /// Returns `None` when the key or table is missing or the value is not valid JSON.
    pub fn json(&self, table: Table, key: &str) -> Option<Value> {
        let bytes = self.raw(table, key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(db = %self.path.display(), key, "Failed to parse JSON: {e}");
                None
            }
        }
    }

    /// Typed variant of [`Store::json`]; a shape mismatch is treated like bad JSON.
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Option<T> {
        let value = self.json(table, key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(db = %self.path.display(), key, "Unexpected value shape: {e}");
                None
            }
        }
    }

    /// All `(key, value)` rows whose key starts with `prefix`, in insertion order.
    ///
    /// Rows with a NULL value are skipped.
    pub fn scan_prefix(&self, table: Table, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let sql = format!(
            "SELECT key, value FROM {} WHERE key LIKE ?1 ESCAPE '\\' ORDER BY rowid",
            table.name()
        );
        let pattern = format!("{}%", escape_like(prefix));
        let result = self.conn.prepare(&sql).and_then(|mut stmt| {
            let rows = stmt
                .query_map([&pattern], |row| {
                    Ok((row.get::<_, String>(0)?, value_bytes(row.get_ref(1)?)))
                })?
                .collect::<Result<Vec<_>, _>>();
            rows
        });
        match result {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect(),
            Err(e) => {
                debug!(db = %self.path.display(), table = table.name(), prefix, "Prefix scan failed: {e}");
                Vec::new()
            }
        }
    }

    /// Keys matching a raw SQL `LIKE` pattern. Diagnostics only.
    pub fn keys_like(&self, table: Table, pattern: &str) -> Vec<String> {
        let sql = format!("SELECT key FROM {} WHERE key LIKE ?1 ORDER BY key", table.name());
        let result = self.conn.prepare(&sql).and_then(|mut stmt| {
            let keys = stmt
                .query_map([pattern], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>();
            keys
        });
        match result {
            Ok(keys) => keys,
            Err(e) => {
                debug!(db = %self.path.display(), table = table.name(), pattern, "Key listing failed: {e}");
                Vec::new()
            }
        }
    }
}

fn value_bytes(value: ValueRef<'_>) -> Option<Vec<u8>> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes.to_vec()),
        _ => None,
    }
}

fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}


#[cfg(test)]
mod tests {
    use super::test_support::create_db;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_lookup_decodes_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        create_db(&path, &[("workbench.auxiliaryBar.hidden", "false")], &[]);

        let store = Store::open(&path).unwrap();
        assert_eq!(
            store.json(Table::ItemTable, "workbench.auxiliaryBar.hidden"),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn missing_key_and_malformed_json_are_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        create_db(&path, &[("broken", "{not json")], &[]);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.json(Table::ItemTable, "absent"), None);
        assert_eq!(store.json(Table::ItemTable, "broken"), None);
    }

    #[test]
    fn missing_table_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE other (x INTEGER);").unwrap();
        drop(conn);

        let store = Store::open(&path).unwrap();
        assert!(!store.has_table(Table::ItemTable));
        assert_eq!(store.json(Table::ItemTable, "anything"), None);
        assert!(store.scan_prefix(Table::CursorDiskKv, "bubbleId:").is_empty());
        assert!(store.keys_like(Table::ItemTable, "%").is_empty());
    }

    #[test]
    fn blob_values_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        create_db(&path, &[], &[]);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO ItemTable (key, value) VALUES ('blob', ?1)",
                [br#"{"a":1}"#.to_vec()],
            )
            .unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(
            store.json(Table::ItemTable, "blob"),
            Some(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn scan_prefix_keeps_insertion_order_and_escapes_wildcards() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        create_db(
            &path,
            &[],
            &[
                ("bubbleId:s1:b", "2"),
                ("bubbleId:s1:a", "1"),
                ("bubbleIdXs1", "3"),
                ("composerData:s1", "{}"),
            ],
        );

        let store = Store::open(&path).unwrap();
        let keys: Vec<String> = store
            .scan_prefix(Table::CursorDiskKv, "bubbleId:")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["bubbleId:s1:b", "bubbleId:s1:a"]);

        // '_' must match literally, not as a single-character wildcard.
        assert!(store.scan_prefix(Table::CursorDiskKv, "bubble_d").is_empty());
    }

    #[test]
    fn open_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Store::open(&dir.path().join("missing.vscdb")).is_err());
    }

    #[test]
    fn open_rejects_non_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        std::fs::write(&path, "definitely not sqlite, just some text padding it out").unwrap();
        assert!(Store::open(&path).is_err());
    }

    #[test]
    fn typed_get_treats_shape_mismatch_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILENAME);
        create_db(&path, &[("flag", "\"yes\"")], &[]);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.get::<bool>(Table::ItemTable, "flag"), None);
        assert_eq!(
            store.get::<String>(Table::ItemTable, "flag").as_deref(),
            Some("yes")
        );
    }
}
