//! Best-effort project naming from the file paths a workspace has touched.
//!
//! The editor does not record a project name. It only keeps a history of
//! opened resources, an optional debug root, and the source-control repositories
//! it has seen. Names are guessed from those paths with a chain of heuristics, and
//! the result is never the user's own account name.

use crate::store::{Store, Table};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;

pub const ROOT: &str = "Root";
pub const HOME_DIRECTORY: &str = "Home Directory";
pub const UNKNOWN_PROJECT: &str = "Unknown Project";
/// Placeholder for projects that could not be resolved at all.
pub const UNKNOWN: &str = "(unknown)";

const PROJECT_MARKERS: &[&str] = &[".git", "pyproject.toml", "package.json", "go.mod", "Cargo.toml"];

/// Directory names that group projects rather than name one.
const CONTAINER_DIRS: &[&str] = &[
    "Documents",
    "Projects",
    "Code",
    "workspace",
    "repos",
    "git",
    "src",
    "codebase",
    "Downloads",
    "Desktop",
    "Library",
    "Applications",
    "System",
    "var",
    "opt",
    "tmp",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(rename = "rootPath")]
    pub root_path: String,
}

impl Project {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            root_path: UNKNOWN.to_string(),
        }
    }
}

/// Applies the naming heuristics relative to one user's home directory.
#[derive(Debug, Clone)]
pub struct ProjectNamer {
    home: Option<PathBuf>,
    username: Option<String>,
}

impl ProjectNamer {
    /// The username is taken to be the last component of `home`.
    pub fn new(home: Option<PathBuf>) -> Self {
        let username = home
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        Self { home, username }
    }

    pub fn from_env() -> Self {
        Self::new(dirs::home_dir())
    }

    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_username(&self, name: &str) -> bool {
        self.username.as_deref() == Some(name)
    }

    pub fn is_home(&self, path: &Path) -> bool {
        self.home.as_deref().is_some_and(|home| normalize(home) == normalize(path))
    }

    /// Guess a project name for a directory. Never fails and never returns the username.
    pub fn name_for_root(&self, root: &Path) -> String {
        let root = normalize(root);
        let parts: Vec<String> = root
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return ROOT.to_string();
        }
        if self.is_home(&root) {
            return HOME_DIRECTORY.to_string();
        }

        if let Some(name) = self.name_from_markers(&root) {
            return name;
        }

        let usable = |name: &str| !CONTAINER_DIRS.contains(&name) && !self.is_username(name);
        let last = &parts[parts.len() - 1];
        if usable(last.as_str()) {
            return last.clone();
        }
        if parts.len() > 1 {
            let parent = &parts[parts.len() - 2];
            if usable(parent.as_str()) {
                return parent.clone();
            }
        }
        UNKNOWN_PROJECT.to_string()
    }

    fn name_from_markers(&self, root: &Path) -> Option<String> {
        for dir in root.ancestors() {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                // Reached the filesystem root.
                break;
            };
            if self.is_username(&name) {
                continue;
            }
            if PROJECT_MARKERS.iter().any(|m| dir.join(m).exists()) {
                debug!(dir = %dir.display(), "Found project marker");
                return Some(name);
            }
        }
        None
    }

    /// Name the project that contains all of `files`.
    pub fn name_for_files(&self, files: &[PathBuf]) -> Project {
        match common_ancestor(files) {
            Some(root) => Project {
                name: self.name_for_root(&root),
                root_path: display_path(&root),
            },
            None => Project {
                name: ROOT.to_string(),
                root_path: "/".to_string(),
            },
        }
    }
}

/// Deepest directory containing every file in `files`, compared component-wise.
///
/// Each entry is treated as a file, so the search starts from its parent directory.
pub fn common_ancestor(files: &[PathBuf]) -> Option<PathBuf> {
    let mut dirs = files.iter().map(|f| {
        let f = normalize(f);
        f.parent().map(Path::to_path_buf).unwrap_or(f)
    });
    let first = dirs.next()?;
    let mut len = first.components().count();
    for dir in dirs {
        let shared = dir
            .components()
            .zip(first.components())
            .take_while(|(a, b)| a == b)
            .count();
        len = len.min(shared);
    }
    Some(first.components().take(len).collect())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn display_path(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.is_empty() { "/".to_string() } else { s }
}

/// Convert a `file://` URI into a local path, undoing percent-encoding.
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    if !uri.starts_with("file://") {
        return None;
    }
    Url::parse(uri).ok()?.to_file_path().ok()
}

#[derive(Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    editor: Option<HistoryEditor>,
}

#[derive(Deserialize)]
struct HistoryEditor {
    #[serde(default)]
    resource: Option<String>,
}

/// Resolve the project of a workspace database.
///
/// Tries the common ancestor of the editor history first, then `debug.selectedroot`.
pub fn workspace_project(store: &Store, namer: &ProjectNamer) -> Project {
    let entries: Vec<serde_json::Value> = store
        .get(Table::ItemTable, "history.entries")
        .unwrap_or_default();
    let paths: Vec<PathBuf> = entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<HistoryEntry>(v).ok())
        .filter_map(|e| e.editor?.resource)
        .filter_map(|r| file_uri_to_path(&r))
        .collect();

    if !paths.is_empty() {
        debug!(db = %store.path().display(), count = paths.len(), "History paths");
        return namer.name_for_files(&paths);
    }

    let selected_root = store
        .get::<String>(Table::ItemTable, "debug.selectedroot")
        .and_then(|uri| file_uri_to_path(&uri));
    if let Some(root) = selected_root {
        debug!(root = %root.display(), "Project root from debug.selectedroot");
        return Project {
            name: namer.name_for_root(&root),
            root_path: display_path(&root),
        };
    }

    Project::unknown()
}

#[derive(Deserialize)]
struct VisibleRepositories {
    #[serde(default)]
    all: Vec<serde_json::Value>,
}

/// Last path component of the first git repository the workspace has open.
pub fn git_repository_name(store: &Store) -> Option<String> {
    let repos: VisibleRepositories = store.get(Table::ItemTable, "scm:view:visibleRepositories")?;
    repos
        .all
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|r| r.contains("git:Git:file:///"))
        .find_map(|r| {
            let path = r.rsplit("file:///").next()?;
            path.split('/').filter(|p| !p.is_empty()).last().map(str::to_string)
        })
}
