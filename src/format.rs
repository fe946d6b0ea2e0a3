//! Turns extracted sessions into the shape served over HTTP and written by exporters.

use crate::extract::{ChatSession, GLOBAL_WORKSPACE, UNKNOWN_WORKSPACE};
use crate::importer::Message;
use crate::project::{self, HOME_DIRECTORY, ProjectNamer, ROOT, UNKNOWN, UNKNOWN_PROJECT};
use crate::store::Store;
use crate::utils;
use crate::workspace::StorageLayout;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use tracing::{debug, warn};
use uuid::Uuid;

const UNKNOWN_DB_PATH: &str = "Unknown database path";

/// Names that are technically valid but say nothing about the project.
const GENERIC_NAMES: &[&str] = &["Documents", "Downloads", "Desktop"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedProject {
    pub name: String,
    #[serde(rename = "rootPath")]
    pub root_path: String,
    pub workspace_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedChat {
    pub project: FormattedProject,
    pub messages: Vec<Message>,
    /// Epoch seconds.
    pub date: i64,
    pub session_id: String,
    pub workspace_id: String,
    pub db_path: String,
    pub title: String,
}

impl FormattedChat {
    /// Stand-in for a session whose enrichment failed.
    fn placeholder(session_id: &str) -> Self {
        Self {
            project: FormattedProject {
                name: "Error".to_string(),
                root_path: UNKNOWN.to_string(),
                workspace_id: "error".to_string(),
            },
            messages: Vec::new(),
            date: utils::now_secs(),
            session_id: session_or_uuid(session_id),
            workspace_id: "error".to_string(),
            db_path: "Error retrieving database path".to_string(),
            title: "Error".to_string(),
        }
    }
}

fn session_or_uuid(session_id: &str) -> String {
    if session_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        session_id.to_string()
    }
}

pub struct ChatFormatter<'a> {
    namer: &'a ProjectNamer,
    layout: &'a StorageLayout,
}

impl<'a> ChatFormatter<'a> {
    pub fn new(namer: &'a ProjectNamer, layout: &'a StorageLayout) -> Self {
        Self { namer, layout }
    }

    /// Format `chat`. Never fails: an internal error yields a placeholder.
    pub fn format(&self, chat: &ChatSession) -> FormattedChat {
        match self.try_format(chat) {
            Ok(formatted) => formatted,
            Err(e) => {
                warn!(session_id = %chat.session_id, "Failed to format chat: {e:#}");
                FormattedChat::placeholder(&chat.session_id)
            }
        }
    }

    pub fn format_all(&self, chats: &[ChatSession]) -> Vec<FormattedChat> {
        chats.iter().map(|c| self.format(c)).collect()
    }

    pub fn try_format(&self, chat: &ChatSession) -> Result<FormattedChat> {
        let mut name = chat.project.name.clone();
        let root_path = chat.project.root_path.clone();

        if self.is_low_information(&name, &root_path)
            && let Some(better) = self.rename_from_root(&root_path)
        {
            debug!(session_id = %chat.session_id, from = %name, to = %better, "Renamed project");
            name = better;
        }

        if (name == HOME_DIRECTORY || name == UNKNOWN)
            && let Some(repo) = self.git_name(&chat.workspace_id)?
            && self.is_meaningful(&repo)
        {
            name = repo;
        }

        let date = chat
            .meta
            .created_at
            .map(|ms| ms / 1000)
            .unwrap_or_else(utils::now_secs);

        Ok(FormattedChat {
            project: FormattedProject {
                name,
                root_path,
                workspace_id: chat.workspace_id.clone(),
            },
            messages: chat.messages.clone(),
            date,
            session_id: session_or_uuid(&chat.session_id),
            workspace_id: chat.workspace_id.clone(),
            db_path: chat
                .db_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| UNKNOWN_DB_PATH.to_string()),
            title: chat.meta.title.clone(),
        })
    }

    fn is_low_information(&self, name: &str, root_path: &str) -> bool {
        name.is_empty()
            || name == UNKNOWN
            || name == ROOT
            || self.namer.is_username(name)
            || self.namer.is_home(Path::new(root_path))
    }

    fn is_meaningful(&self, name: &str) -> bool {
        name != UNKNOWN_PROJECT && !self.namer.is_username(name) && !GENERIC_NAMES.contains(&name)
    }

    fn rename_from_root(&self, root_path: &str) -> Option<String> {
        if root_path.is_empty() || root_path == UNKNOWN {
            return None;
        }
        let root = Path::new(root_path);
        let candidate = self.namer.name_for_root(root);
        if self.is_meaningful(&candidate) {
            return Some(candidate);
        }
        after_codebase(root).filter(|name| !self.namer.is_username(name))
    }

    /// Repository name from the workspace database, if the session belongs to one.
    fn git_name(&self, workspace_id: &str) -> Result<Option<String>> {
        if workspace_id == GLOBAL_WORKSPACE || workspace_id == UNKNOWN_WORKSPACE {
            return Ok(None);
        }
        let Some(db_path) = self.layout.workspace_db(workspace_id) else {
            return Ok(None);
        };
        let store = Store::open(&db_path)
            .wrap_err_with(|| format!("Failed to read workspace {workspace_id}"))?;
        Ok(project::git_repository_name(&store))
    }
}

/// The component following a `codebase` directory, e.g. `~/codebase/<name>/src`.
fn after_codebase(root: &Path) -> Option<String> {
    let mut parts = root.components().filter_map(|c| match c {
        Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
        _ => None,
    });
    parts.by_ref().find(|p| p == "codebase")?;
    parts.next()
}
