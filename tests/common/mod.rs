//! Shared helpers for integration tests
#![allow(dead_code)]

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Builder for a fake Cursor storage root made of real state databases.
pub struct StorageBuilder {
    temp_dir: TempDir,
}

/// Rows for one state database.
#[derive(Default, Clone)]
pub struct DbRows {
    items: Vec<(String, String)>,
    disk_kv: Vec<(String, String)>,
}

impl DbRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `ItemTable` row; `value` is stored verbatim.
    pub fn item(mut self, key: &str, value: impl ToString) -> Self {
        self.items.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a `cursorDiskKV` row; `value` is stored verbatim.
    pub fn disk(mut self, key: &str, value: impl ToString) -> Self {
        self.disk_kv.push((key.to_string(), value.to_string()));
        self
    }

    fn write(&self, path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create db dir");
        let conn = Connection::open(path).expect("Failed to create db");
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
             CREATE TABLE cursorDiskKV (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);",
        )
        .expect("Failed to create tables");
        for (k, v) in &self.items {
            conn.execute("INSERT INTO ItemTable (key, value) VALUES (?1, ?2)", [k, v])
                .expect("Failed to insert item");
        }
        for (k, v) in &self.disk_kv {
            conn.execute("INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)", [k, v])
                .expect("Failed to insert disk row");
        }
    }
}

impl StorageBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn workspace_db_path(&self, id: &str) -> PathBuf {
        self.temp_dir
            .path()
            .join("User/workspaceStorage")
            .join(id)
            .join("state.vscdb")
    }

    pub fn global_db_path(&self) -> PathBuf {
        self.temp_dir.path().join("User/globalStorage/state.vscdb")
    }

    /// Add a workspace database with the given rows.
    pub fn with_workspace(self, id: &str, rows: DbRows) -> Self {
        rows.write(&self.workspace_db_path(id));
        self
    }

    /// Add the global database with the given rows.
    pub fn with_global(self, rows: DbRows) -> Self {
        rows.write(&self.global_db_path());
        self
    }

    /// Add a file at `relative` that is not a database.
    pub fn with_garbage(self, relative: &str) -> Self {
        let path = self.temp_dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dir");
        fs::write(&path, "this file is plain text and not a database at all").expect("Failed to write");
        self
    }

    pub fn build(self) -> TempDir {
        self.temp_dir
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `history.entries` value pointing at the given `file://` paths.
pub fn history_entries(paths: &[&str]) -> String {
    let entries: Vec<serde_json::Value> = paths
        .iter()
        .map(|p| serde_json::json!({ "editor": { "resource": format!("file://{p}") } }))
        .collect();
    serde_json::Value::Array(entries).to_string()
}
