//! Data models for Folio
//!
//! Defines the document graph: pages, folders, and tags. The serialized
//! form uses camelCase keys so records stay readable by every tier and by
//! peers running other builds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Longest title kept for pages and folders (in characters)
pub const MAX_TITLE_LEN: usize = 200;

/// Longest tag name kept (in characters)
pub const MAX_TAG_LEN: usize = 50;

/// Block list format version written into new content
pub const CONTENT_VERSION: &str = "2.28.2";

pub const DEFAULT_PAGE_TITLE: &str = "Untitled Page";
pub const DEFAULT_FOLDER_TITLE: &str = "Untitled Folder";
pub const DEFAULT_TAG_COLOR: &str = "#6b7280";

/// Generate a fresh record id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Truncate to at most `max` characters (not bytes)
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Trim and bound a title or tag name. `None` when nothing is left.
pub fn normalize_label(s: &str, max: usize) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_chars(trimmed, max).trim_end().to_string())
}

/// One block of page content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Block {
    /// A paragraph block holding plain text
    pub fn paragraph(text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".to_string(), Value::String(text.into()));
        Self {
            id: None,
            kind: "paragraph".to_string(),
            data,
        }
    }
}

/// Versioned block list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub time: i64,
    pub blocks: Vec<Block>,
    pub version: String,
}

impl Content {
    pub fn empty() -> Self {
        Self {
            time: now_millis(),
            blocks: Vec::new(),
            version: CONTENT_VERSION.to_string(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::empty()
    }
}

/// Password verifier stored with a locked page. Never the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasswordRecord {
    pub hash: String,
    pub salt: String,
}

/// A document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub title: String,
    pub content: Content,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tag_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

impl Page {
    /// Create a new, empty page
    pub fn new(title: impl Into<String>) -> Self {
        let mut page = Self {
            id: new_id(),
            title: DEFAULT_PAGE_TITLE.to_string(),
            content: Content::empty(),
            tags: Vec::new(),
            tag_names: Vec::new(),
            created_at: Utc::now(),
            password: None,
            folder_id: None,
        };
        page.set_title(title);
        page
    }

    /// Set the title, truncating to the allowed length
    pub fn set_title(&mut self, title: impl Into<String>) {
        let title: String = title.into();
        self.title = normalize_label(&title, MAX_TITLE_LEN)
            .unwrap_or_else(|| DEFAULT_PAGE_TITLE.to_string());
    }

    /// Replace the block list, stamping the content time
    pub fn set_blocks(&mut self, blocks: Vec<Block>) {
        self.content.blocks = blocks;
        self.content.time = now_millis();
    }

    /// Add a tag reference
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag: String = tag.into();
        let Some(tag) = normalize_label(&tag, MAX_TAG_LEN) else {
            return;
        };
        if self.tags.contains(&tag) {
            return;
        }
        self.tags.push(tag.clone());
        if !self.tag_names.contains(&tag) {
            self.tag_names.push(tag);
        }
    }

    /// Remove a tag reference
    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| t != tag);
        self.tag_names.retain(|t| t != tag);
    }

    pub fn is_locked(&self) -> bool {
        self.password.is_some()
    }
}

/// Marker for the `"type": "folder"` discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FolderKind {
    #[serde(rename = "folder")]
    #[default]
    Folder,
}

/// A container of pages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: FolderKind,
    #[serde(default)]
    pub pages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    pub fn new(title: impl Into<String>) -> Self {
        let title: String = title.into();
        Self {
            id: new_id(),
            title: normalize_label(&title, MAX_TITLE_LEN)
                .unwrap_or_else(|| DEFAULT_FOLDER_TITLE.to_string()),
            kind: FolderKind::Folder,
            pages: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A record in the page list: either a page or a folder.
///
/// Folders are told apart by their `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Entry {
    Folder(Folder),
    Page(Page),
}

impl Entry {
    pub fn id(&self) -> &str {
        match self {
            Entry::Folder(f) => &f.id,
            Entry::Page(p) => &p.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Entry::Folder(f) => &f.title,
            Entry::Page(p) => &p.title,
        }
    }

    pub fn as_page(&self) -> Option<&Page> {
        match self {
            Entry::Page(p) => Some(p),
            Entry::Folder(_) => None,
        }
    }

    pub fn as_page_mut(&mut self) -> Option<&mut Page> {
        match self {
            Entry::Page(p) => Some(p),
            Entry::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Entry::Folder(f) => Some(f),
            Entry::Page(_) => None,
        }
    }

    pub fn as_folder_mut(&mut self) -> Option<&mut Folder> {
        match self {
            Entry::Folder(f) => Some(f),
            Entry::Page(_) => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entry::Folder(_))
    }
}

impl From<Page> for Entry {
    fn from(page: Page) -> Self {
        Entry::Page(page)
    }
}

impl From<Folder> for Entry {
    fn from(folder: Folder) -> Self {
        Entry::Folder(folder)
    }
}

/// A tag in the global registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag {
    pub name: String,
    pub color: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: normalize_label(&name, MAX_TAG_LEN).unwrap_or_default(),
            color: DEFAULT_TAG_COLOR.to_string(),
        }
    }

    pub fn with_color(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            ..Self::new(name)
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The complete set of pages and tags exchanged during a sync or export
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub pages: Vec<Entry>,
    pub tags: Vec<Tag>,
    pub timestamp: i64,
}

impl Snapshot {
    pub fn new(pages: Vec<Entry>, tags: Vec<Tag>) -> Self {
        Self {
            pages,
            tags,
            timestamp: now_millis(),
        }
    }
}

/// A snapshot as received from outside (peer or bundle), not yet validated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawSnapshot {
    #[serde(default)]
    pub pages: Value,
    #[serde(default)]
    pub tags: Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl From<&Snapshot> for RawSnapshot {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            pages: serde_json::to_value(&snapshot.pages).unwrap_or(Value::Null),
            tags: serde_json::to_value(&snapshot.tags).unwrap_or(Value::Null),
            timestamp: Some(snapshot.timestamp),
        }
    }
}
