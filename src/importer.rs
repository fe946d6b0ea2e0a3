/// Type definitions for the chat records the editor keeps in its state databases,
/// and their normalized form.
///
/// The editor has changed where and how it stores conversations several times, and
/// old records are never migrated, so every historical shape still has to be read.
/// None of these formats is documented; field names below are as observed.
///
/// Known shapes:
/// - `ItemTable["workbench.panel.aichat.view.aichat.chatdata"]` – legacy chat panel,
///   `{ tabs: [{ tabId, bubbles: [{ type: "user" | "ai", text | content }] }] }`
/// - `ItemTable["composer.composerData"]` – composer index,
///   `{ allComposers: [{ composerId, name, createdAt, lastUpdatedAt, messages? }] }`
/// - `ItemTable["aiService.prompts*"]` / `["aiService.generations*"]` – `[{ id, text }]`
/// - `cursorDiskKV["bubbleId:<composerId>:<bubbleId>"]` – one bubble, `{ type: 1 | 2, text, richText }`
/// - `cursorDiskKV["composerData:<composerId>"]` – `{ name, createdAt, conversation: [{ type, text }] }`
///
/// Parsers are deliberately lenient: unknown fields are ignored, fields of the wrong
/// type are treated as absent, and a record that cannot be normalized yields `None`.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Normalized form
// ---------------------------------------------------------------------------

/// Conversation turn role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Descriptive data about a session, independent of its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub title: String,
    /// Epoch milliseconds.
    #[serde(rename = "createdAt")]
    pub created_at: Option<i64>,
    /// Epoch milliseconds.
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: Option<i64>,
}

impl SessionMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            created_at: None,
            last_updated_at: None,
        }
    }

    /// Take timestamps from `other` where this meta has none.
    pub fn fill_missing_times(&mut self, other: &SessionMeta) {
        if self.created_at.is_none() {
            self.created_at = other.created_at;
        }
        if self.last_updated_at.is_none() {
            self.last_updated_at = other.last_updated_at;
        }
    }
}

/// What one stored record contributes to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub meta: Option<SessionMeta>,
}

/// First eight characters of an id, for titles and filenames.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Epoch milliseconds stored as an integer or a float; anything else is absent.
fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Legacy chat panel (ItemTable)
// ---------------------------------------------------------------------------

/// `workbench.panel.aichat.view.aichat.chatdata`
#[derive(Debug, Default, Deserialize)]
pub struct ChatData {
    #[serde(default)]
    pub tabs: Vec<Value>,
}

/// One tab of the legacy chat panel; each tab is one session.
#[derive(Debug, Deserialize)]
pub struct ChatTab {
    #[serde(rename = "tabId")]
    pub tab_id: String,
    #[serde(default)]
    pub bubbles: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TabBubble {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
}

/// Parse one chat tab. `title_prefix` becomes the title of a session seen for the first time.
pub fn parse_chat_tab(value: &Value, title_prefix: &str) -> Option<Fragment> {
    let tab = ChatTab::deserialize(value).ok()?;
    if tab.tab_id.is_empty() {
        return None;
    }
    let messages = tab
        .bubbles
        .iter()
        .filter_map(|b| TabBubble::deserialize(b).ok())
        .filter_map(|b| {
            let kind = b.kind.filter(|k| !k.is_null())?;
            let text = non_empty_str(b.text.as_ref()).or_else(|| non_empty_str(b.content.as_ref()))?;
            let role = if kind.as_str() == Some("user") {
                Role::User
            } else {
                Role::Assistant
            };
            Some(Message::new(role, text))
        })
        .collect();
    Some(Fragment {
        meta: Some(SessionMeta::titled(format!(
            "{title_prefix} {}",
            short_id(&tab.tab_id)
        ))),
        session_id: tab.tab_id,
        messages,
    })
}

// ---------------------------------------------------------------------------
// Composer index (ItemTable)
// ---------------------------------------------------------------------------

/// `composer.composerData`
#[derive(Debug, Default, Deserialize)]
pub struct ComposerIndex {
    #[serde(rename = "allComposers", default)]
    pub all_composers: Vec<Value>,
}

/// One entry of the composer index. Older builds inline the messages here.
#[derive(Debug, Deserialize)]
pub struct ComposerHead {
    #[serde(rename = "composerId")]
    pub composer_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "createdAt", default, deserialize_with = "lenient_millis")]
    pub created_at: Option<i64>,
    #[serde(rename = "lastUpdatedAt", default, deserialize_with = "lenient_millis")]
    pub last_updated_at: Option<i64>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ComposerMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

pub fn parse_composer_head(value: &Value) -> Option<Fragment> {
    let head = ComposerHead::deserialize(value).ok()?;
    if head.composer_id.is_empty() {
        return None;
    }
    let messages = head
        .messages
        .iter()
        .filter_map(|m| ComposerMessage::deserialize(m).ok())
        .filter_map(|m| {
            let content = non_empty_str(m.content.as_ref())?;
            let role = if m.role.as_deref() == Some("user") {
                Role::User
            } else {
                Role::Assistant
            };
            Some(Message::new(role, content))
        })
        .collect();
    Some(Fragment {
        session_id: head.composer_id,
        messages,
        meta: Some(SessionMeta {
            title: head
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "(untitled)".to_string()),
            created_at: head.created_at,
            last_updated_at: head.last_updated_at,
        }),
    })
}

// ---------------------------------------------------------------------------
// AI service prompt/generation logs (ItemTable)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AiServiceItem {
    id: Value,
    text: Value,
}

/// One item of an `aiService.prompts*` or `aiService.generations*` list.
pub fn parse_ai_service_item(value: &Value, role: Role) -> Option<Fragment> {
    let item = AiServiceItem::deserialize(value).ok()?;
    let session_id = match &item.id {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = non_empty_str(Some(&item.text))?;
    Some(Fragment {
        session_id,
        messages: vec![Message::new(role, text)],
        meta: None,
    })
}

// ---------------------------------------------------------------------------
// Disk key-value records (cursorDiskKV)
// ---------------------------------------------------------------------------

/// Session id embedded in a `bubbleId:<id>:<bubble>` or `composerData:<id>` key.
pub fn session_id_from_key(key: &str) -> Option<&str> {
    key.split(':').nth(1).filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct DiskBubble {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(rename = "richText", default)]
    rich_text: Option<Value>,
}

/// `cursorDiskKV["bubbleId:…"]`. Type `1` is the user, anything else the assistant.
pub fn parse_disk_bubble(key: &str, value: &Value) -> Option<Fragment> {
    let session_id = session_id_from_key(key)?;
    let bubble = DiskBubble::deserialize(value).ok()?;
    let text = non_empty_str(bubble.text.as_ref())
        .or_else(|| non_empty_str(bubble.rich_text.as_ref()))?
        .trim();
    let role = if bubble.kind.and_then(|k| k.as_i64()) == Some(1) {
        Role::User
    } else {
        Role::Assistant
    };
    Some(Fragment {
        session_id: session_id.to_string(),
        messages: vec![Message::new(role, text)],
        meta: None,
    })
}

#[derive(Debug, Deserialize)]
struct DiskComposer {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "createdAt", default, deserialize_with = "lenient_millis")]
    created_at: Option<i64>,
    #[serde(rename = "lastUpdatedAt", default, deserialize_with = "lenient_millis")]
    last_updated_at: Option<i64>,
    #[serde(default)]
    conversation: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ConversationEntry {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
}

/// `cursorDiskKV["composerData:…"]`, including its inline conversation if present.
pub fn parse_disk_composer(key: &str, value: &Value) -> Option<Fragment> {
    let session_id = session_id_from_key(key)?;
    let composer = DiskComposer::deserialize(value).ok()?;
    let messages = composer
        .conversation
        .iter()
        .filter_map(|m| ConversationEntry::deserialize(m).ok())
        .filter_map(|m| {
            let kind = m.kind.filter(|k| !k.is_null())?;
            let text = non_empty_str(m.text.as_ref())?;
            let role = if kind.as_i64() == Some(1) {
                Role::User
            } else {
                Role::Assistant
            };
            Some(Message::new(role, text))
        })
        .collect();
    Some(Fragment {
        meta: Some(SessionMeta {
            title: composer
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Chat {}", short_id(session_id))),
            created_at: composer.created_at,
            last_updated_at: composer.last_updated_at.or(composer.created_at),
        }),
        session_id: session_id.to_string(),
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_tab_maps_roles_and_skips_untyped_bubbles() {
        let tab = json!({
            "tabId": "tab-1234567890",
            "bubbles": [
                {"type": "user", "text": "How do I sort?"},
                {"type": "ai", "content": "Use sort()."},
                {"text": "no type"},
                {"type": "ai", "text": ""},
                "garbage"
            ]
        });
        let fragment = parse_chat_tab(&tab, "Chat").unwrap();
        assert_eq!(fragment.session_id, "tab-1234567890");
        assert_eq!(
            fragment.messages,
            vec![
                Message::new(Role::User, "How do I sort?"),
                Message::new(Role::Assistant, "Use sort()."),
            ]
        );
        assert_eq!(fragment.meta.unwrap().title, "Chat tab-1234");
    }

    #[test]
    fn chat_tab_without_id_is_rejected() {
        assert!(parse_chat_tab(&json!({"bubbles": []}), "Chat").is_none());
        assert!(parse_chat_tab(&json!({"tabId": 7}), "Chat").is_none());
    }

    #[test]
    fn composer_head_carries_metadata() {
        let head = json!({
            "composerId": "c1",
            "name": "Refactor parser",
            "createdAt": 1_700_000_000_000i64,
            "lastUpdatedAt": 1_700_000_500_000.0,
            "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]
        });
        let fragment = parse_composer_head(&head).unwrap();
        let meta = fragment.meta.unwrap();
        assert_eq!(meta.title, "Refactor parser");
        assert_eq!(meta.created_at, Some(1_700_000_000_000));
        assert_eq!(meta.last_updated_at, Some(1_700_000_500_000));
        assert_eq!(fragment.messages.len(), 2);
    }

    #[test]
    fn composer_head_without_name_is_untitled() {
        let fragment = parse_composer_head(&json!({"composerId": "c1", "createdAt": "soon"})).unwrap();
        let meta = fragment.meta.unwrap();
        assert_eq!(meta.title, "(untitled)");
        assert_eq!(meta.created_at, None);
    }

    #[test]
    fn disk_bubble_uses_key_for_session_and_rich_text_fallback() {
        let f = parse_disk_bubble("bubbleId:abc:b1", &json!({"type": 1, "text": "  question  "})).unwrap();
        assert_eq!(f.session_id, "abc");
        assert_eq!(f.messages, vec![Message::new(Role::User, "question")]);

        let f = parse_disk_bubble("bubbleId:abc:b2", &json!({"type": 2, "text": "", "richText": "answer"})).unwrap();
        assert_eq!(f.messages, vec![Message::new(Role::Assistant, "answer")]);

        assert!(parse_disk_bubble("bubbleId:abc:b3", &json!({"type": 2})).is_none());
        assert!(parse_disk_bubble("bubbleId", &json!({"type": 1, "text": "x"})).is_none());
    }

    #[test]
    fn disk_composer_conversation() {
        let f = parse_disk_composer(
            "composerData:0123456789abcdef",
            &json!({
                "createdAt": 1000,
                "conversation": [
                    {"type": 1, "text": "first"},
                    {"type": 2, "text": "second"},
                    {"text": "untyped"}
                ]
            }),
        )
        .unwrap();
        assert_eq!(f.session_id, "0123456789abcdef");
        assert_eq!(f.messages.len(), 2);
        let meta = f.meta.unwrap();
        assert_eq!(meta.title, "Chat 01234567");
        assert_eq!(meta.last_updated_at, Some(1000));
    }

    #[test]
    fn ai_service_items_need_id_and_text() {
        let f = parse_ai_service_item(&json!({"id": "p1", "text": "prompt"}), Role::User).unwrap();
        assert_eq!(f.session_id, "p1");
        assert!(parse_ai_service_item(&json!({"text": "orphan"}), Role::User).is_none());
        assert!(parse_ai_service_item(&json!({"id": "p1", "text": ""}), Role::User).is_none());
    }

    #[test]
    fn short_id_is_char_safe() {
        assert_eq!(short_id("abcdefghij"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("ééééééééé"), "éééééééé");
    }
}
