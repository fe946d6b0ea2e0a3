//! Reassembles chat sessions from every record shape in every state database.

use crate::importer::{
    self, ChatData, ComposerIndex, Fragment, Message, Role, SessionMeta,
};
use crate::project::{Project, ProjectNamer, workspace_project};
use crate::store::{Store, Table};
use crate::workspace::StorageLayout;
use eyre::{Result, eyre};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const GLOBAL_WORKSPACE: &str = "(global)";
pub const UNKNOWN_WORKSPACE: &str = "(unknown)";

const CHAT_DATA_KEY: &str = "workbench.panel.aichat.view.aichat.chatdata";
const COMPOSER_INDEX_KEY: &str = "composer.composerData";
const AI_PROMPTS_PREFIX: &str = "aiService.prompts";
const AI_GENERATIONS_PREFIX: &str = "aiService.generations";
const BUBBLE_PREFIX: &str = "bubbleId:";
const COMPOSER_DATA_PREFIX: &str = "composerData:";

/// A fully merged session, ready for formatting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSession {
    pub session_id: String,
    pub project: Project,
    pub meta: SessionMeta,
    pub messages: Vec<Message>,
    pub workspace_id: String,
    pub db_path: Option<PathBuf>,
}

/// Which kind of database a shape is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Workspace,
    Global,
}

/// Every way the editor has stored chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    ChatTabs,
    ComposerIndex,
    AiPrompts,
    AiGenerations,
    DiskBubbles,
    DiskComposers,
}

pub const WORKSPACE_SHAPES: &[RecordShape] = &[
    RecordShape::ChatTabs,
    RecordShape::ComposerIndex,
    RecordShape::AiPrompts,
    RecordShape::AiGenerations,
];

pub const GLOBAL_SHAPES: &[RecordShape] = &[
    RecordShape::DiskBubbles,
    RecordShape::DiskComposers,
    RecordShape::ChatTabs,
];

/// One undecoded record. List-valued keys are exploded into one record per item.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: String,
    pub value: Value,
}

impl RecordShape {
    /// Read every record of this shape from `store`. Undecodable rows are skipped.
    pub fn read(self, store: &Store) -> Vec<RawRecord> {
        match self {
            RecordShape::ChatTabs => store
                .get::<ChatData>(Table::ItemTable, CHAT_DATA_KEY)
                .map(|data| explode(CHAT_DATA_KEY, data.tabs))
                .unwrap_or_default(),
            RecordShape::ComposerIndex => store
                .get::<ComposerIndex>(Table::ItemTable, COMPOSER_INDEX_KEY)
                .map(|index| explode(COMPOSER_INDEX_KEY, index.all_composers))
                .unwrap_or_default(),
            RecordShape::AiPrompts => read_lists(store, AI_PROMPTS_PREFIX),
            RecordShape::AiGenerations => read_lists(store, AI_GENERATIONS_PREFIX),
            RecordShape::DiskBubbles => read_rows(store, BUBBLE_PREFIX),
            RecordShape::DiskComposers => read_rows(store, COMPOSER_DATA_PREFIX),
        }
    }

    /// Normalize one record, or `None` if it is malformed.
    pub fn parse(self, record: &RawRecord, source: Source) -> Option<Fragment> {
        let fragment = match self {
            RecordShape::ChatTabs => {
                let prefix = match source {
                    Source::Workspace => "Chat",
                    Source::Global => "Global Chat",
                };
                importer::parse_chat_tab(&record.value, prefix)
            }
            RecordShape::ComposerIndex => importer::parse_composer_head(&record.value),
            RecordShape::AiPrompts => importer::parse_ai_service_item(&record.value, Role::User),
            RecordShape::AiGenerations => {
                importer::parse_ai_service_item(&record.value, Role::Assistant)
            }
            RecordShape::DiskBubbles => importer::parse_disk_bubble(&record.key, &record.value),
            RecordShape::DiskComposers => {
                importer::parse_disk_composer(&record.key, &record.value)
            }
        };
        if fragment.is_none() {
            debug!(shape = ?self, key = %record.key, "Skipping malformed record");
        }
        fragment
    }

    /// Whether this shape's meta replaces meta set by an earlier shape.
    fn meta_is_authoritative(self) -> bool {
        self == RecordShape::ComposerIndex
    }

    /// Fallback title for a session this shape sees without any meta of its own.
    fn fallback_title(self, session_id: &str) -> String {
        format!("Chat {}", importer::short_id(session_id))
    }
}

fn explode(key: &str, items: Vec<Value>) -> Vec<RawRecord> {
    items
        .into_iter()
        .map(|value| RawRecord {
            key: key.to_string(),
            value,
        })
        .collect()
}

fn decode(key: &str, bytes: &[u8]) -> Option<Value> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(key, "Failed to parse JSON: {e}");
            None
        }
    }
}

fn read_lists(store: &Store, prefix: &str) -> Vec<RawRecord> {
    store
        .scan_prefix(Table::ItemTable, prefix)
        .into_iter()
        .filter_map(|(key, bytes)| decode(&key, &bytes).map(|v| (key, v)))
        .flat_map(|(key, value)| match value {
            Value::Array(items) => explode(&key, items),
            other => {
                debug!(key = %key, kind = ?other, "Expected a list");
                Vec::new()
            }
        })
        .collect()
}

fn read_rows(store: &Store, prefix: &str) -> Vec<RawRecord> {
    if !store.has_table(Table::CursorDiskKv) {
        return Vec::new();
    }
    store
        .scan_prefix(Table::CursorDiskKv, prefix)
        .into_iter()
        .filter_map(|(key, bytes)| decode(&key, &bytes).map(|value| RawRecord { key, value }))
        .collect()
}

#[derive(Debug)]
struct SessionEntry {
    session_id: String,
    messages: Vec<Message>,
    meta: SessionMeta,
    workspace_id: String,
    db_path: Option<PathBuf>,
}

/// Sessions keyed by id, in first-seen order.
#[derive(Debug, Default)]
pub struct SessionIndex {
    entries: Vec<SessionEntry>,
    by_id: HashMap<String, usize>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment produced by `shape` from the database at `db_path`,
    /// owned by `workspace_id`.
    ///
    /// The first fragment of a session sets its meta and workspace. Later composer-index
    /// meta replaces both. Meta from any other shape only fills missing timestamps.
    pub fn merge(
        &mut self,
        shape: RecordShape,
        fragment: Fragment,
        workspace_id: &str,
        db_path: &Path,
    ) {
        let Fragment {
            session_id,
            messages,
            meta,
        } = fragment;
        let existing = self.by_id.get(&session_id).copied();
        let entry = match existing {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                match meta {
                    Some(meta) if shape.meta_is_authoritative() => {
                        entry.meta = meta;
                        entry.workspace_id = workspace_id.to_string();
                    }
                    Some(meta) => entry.meta.fill_missing_times(&meta),
                    None => {}
                }
                entry
            }
            None => {
                let meta = meta.unwrap_or_else(|| SessionMeta::titled(shape.fallback_title(&session_id)));
                let idx = self.entries.len();
                self.by_id.insert(session_id.clone(), idx);
                self.entries.push(SessionEntry {
                    session_id,
                    messages: Vec::new(),
                    meta,
                    workspace_id: workspace_id.to_string(),
                    db_path: None,
                });
                &mut self.entries[idx]
            }
        };

        if !messages.is_empty() && entry.db_path.is_none() {
            entry.db_path = Some(db_path.to_path_buf());
        }
        entry.messages.extend(messages);
    }

    /// Run `shapes` over one database and merge everything they yield.
    pub fn ingest(&mut self, store: &Store, shapes: &[RecordShape], source: Source, workspace_id: &str) {
        for &shape in shapes {
            let records = shape.read(store);
            let mut merged = 0usize;
            for record in &records {
                if let Some(fragment) = shape.parse(record, source) {
                    self.merge(shape, fragment, workspace_id, store.path());
                    merged += 1;
                }
            }
            if merged > 0 {
                debug!(shape = ?shape, workspace_id, merged, "Merged records");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop sessions without messages and attach projects.
    ///
    /// `project_of` is called once per distinct workspace id.
    pub fn into_sessions(self, mut project_of: impl FnMut(&str) -> Project) -> Vec<ChatSession> {
        let mut projects: HashMap<String, Project> = HashMap::new();
        let mut sessions: Vec<ChatSession> = self
            .entries
            .into_iter()
            .filter(|e| !e.messages.is_empty())
            .map(|e| {
                let project = projects
                    .entry(e.workspace_id.clone())
                    .or_insert_with(|| project_of(&e.workspace_id))
                    .clone();
                ChatSession {
                    session_id: e.session_id,
                    project,
                    meta: e.meta,
                    messages: e.messages,
                    workspace_id: e.workspace_id,
                    db_path: e.db_path,
                }
            })
            .collect();
        // Stable: ties keep first-seen order.
        sessions.sort_by_key(|s| std::cmp::Reverse(s.meta.last_updated_at.unwrap_or(0)));
        sessions
    }
}

fn open_source(path: &Path) -> Option<Store> {
    match Store::open(path) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Skipping database: {e:#}");
            None
        }
    }
}

/// Every chat session found under `layout`, most recently updated first.
pub fn extract_chats(layout: &StorageLayout, namer: &ProjectNamer) -> Vec<ChatSession> {
    let mut index = SessionIndex::new();
    let mut projects: HashMap<String, Project> = HashMap::new();

    let workspaces = layout.workspaces();
    for ws in &workspaces {
        let Some(store) = open_source(&ws.db_path) else {
            continue;
        };
        projects.insert(ws.id.clone(), workspace_project(&store, namer));
        index.ingest(&store, WORKSPACE_SHAPES, Source::Workspace, &ws.id);
    }

    if let Some(global) = layout.global_db()
        && let Some(store) = open_source(&global)
    {
        index.ingest(&store, GLOBAL_SHAPES, Source::Global, GLOBAL_WORKSPACE);
    }

    let found = index.len();
    let sessions = index.into_sessions(|ws_id| {
        projects.get(ws_id).cloned().unwrap_or_else(Project::unknown)
    });
    info!(
        workspaces = workspaces.len(),
        sessions = sessions.len(),
        skipped_empty = found - sessions.len(),
        "Extracted chats"
    );
    sessions
}

/// The session with id `session_id`, if any.
pub fn find_chat(layout: &StorageLayout, namer: &ProjectNamer, session_id: &str) -> Option<ChatSession> {
    extract_chats(layout, namer)
        .into_iter()
        .find(|s| s.session_id == session_id)
}

/// The session whose id is `id`, or else the only one whose id starts with `id`.
pub fn find_chat_by_prefix<'a>(sessions: &'a [ChatSession], id: &str) -> Result<&'a ChatSession> {
    if let Some(exact) = sessions.iter().find(|s| s.session_id == id) {
        return Ok(exact);
    }
    let mut matches = sessions.iter().filter(|s| s.session_id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(chat), None) => Ok(chat),
        (Some(_), Some(_)) => Err(eyre!("Session id prefix is ambiguous: {id}")),
        (None, _) => Err(eyre!("Chat not found: {id}")),
    }
}
