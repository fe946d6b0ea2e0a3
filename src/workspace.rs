//! Where the editor keeps its state databases, and how to find them.

use crate::store::{DB_FILENAME, Store, Table};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key holding the AI side panel visibility flag in a workspace database.
pub const PANEL_HIDDEN_KEY: &str = "workbench.auxiliaryBar.hidden";

/// One per-project editor workspace and its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: String,
    pub db_path: PathBuf,
}

/// The editor's storage root (the directory containing `User/`).
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/Library/Application Support/Cursor`, `~/.config/Cursor` or `%APPDATA%\Cursor`.
    pub fn detect() -> Option<Self> {
        dirs::config_dir().map(|d| Self::new(d.join("Cursor")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace_storage(&self) -> PathBuf {
        self.root.join("User").join("workspaceStorage")
    }

    /// Every workspace directory that contains a state database, sorted by id.
    ///
    /// A missing storage directory yields an empty list.
    pub fn workspaces(&self) -> Vec<Workspace> {
        let ws_root = self.workspace_storage();
        let Ok(entries) = fs::read_dir(&ws_root) else {
            debug!(root = %ws_root.display(), "No workspace storage directory");
            return Vec::new();
        };

        let mut found: Vec<Workspace> = entries
            .flatten()
            .filter_map(|entry| {
                let db_path = entry.path().join(DB_FILENAME);
                if !db_path.is_file() {
                    return None;
                }
                Some(Workspace {
                    id: entry.file_name().to_string_lossy().into_owned(),
                    db_path,
                })
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Database path of the workspace `id`, if `id` is well-formed and the file exists.
    pub fn workspace_db(&self, id: &str) -> Option<PathBuf> {
        if !is_valid_workspace_id(id) {
            debug!(workspace_id = id, "Rejected workspace id");
            return None;
        }
        let path = self.workspace_storage().join(id).join(DB_FILENAME);
        path.is_file().then_some(path)
    }

    /// The global state database, with a fallback to the legacy extension storage.
    pub fn global_db(&self) -> Option<PathBuf> {
        let global = self.root.join("User").join("globalStorage");
        let current = global.join(DB_FILENAME);
        if current.is_file() {
            return Some(current);
        }

        for legacy in ["cursor.cursor", "cursor"] {
            let Ok(entries) = fs::read_dir(global.join(legacy)) else {
                continue;
            };
            let mut candidates: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "sqlite"))
                .collect();
            candidates.sort();
            if let Some(first) = candidates.into_iter().next() {
                return Some(first);
            }
        }
        None
    }

    /// Whether the AI side panel of workspace `id` is hidden.
    ///
    /// A stored `true`/`false` is returned as is. A missing key or a non-boolean value
    /// counts as hidden. `None` means the workspace database is missing or unreadable.
    pub fn panel_hidden(&self, id: &str) -> Option<bool> {
        let db_path = self.workspace_db(id)?;
        let store = match Store::open(&db_path) {
            Ok(store) => store,
            Err(e) => {
                debug!(workspace_id = id, "Cannot read workspace database: {e:#}");
                return None;
            }
        };
        let hidden = store
            .json(Table::ItemTable, PANEL_HIDDEN_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        Some(hidden)
    }
}

/// Workspace ids are opaque directory names; anything that could escape the
/// storage directory is refused.
pub fn is_valid_workspace_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
        && id != "(global)"
        && id != "(unknown)"
}
