//! Structural repair of raw page records
//!
//! Every function here is total: malformed input is replaced with safe
//! defaults, never rejected. Repair is idempotent, so repaired data passes
//! through unchanged.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::{
    new_id, normalize_label, now_millis, Block, Content, Entry, Folder, FolderKind, Page,
    PasswordRecord, Tag, CONTENT_VERSION, DEFAULT_FOLDER_TITLE, DEFAULT_PAGE_TITLE,
    DEFAULT_TAG_COLOR, MAX_TAG_LEN, MAX_TITLE_LEN,
};

/// Block types the editor understands
pub const KNOWN_BLOCK_TYPES: &[&str] = &[
    "paragraph",
    "header",
    "list",
    "checklist",
    "quote",
    "code",
    "delimiter",
    "table",
    "image",
    "warning",
    "embed",
    "raw",
];

/// Type given to blocks of unknown type
pub const FALLBACK_BLOCK_TYPE: &str = "paragraph";

/// Repair a single raw page. Never fails.
pub fn repair_page(raw: &Value) -> Page {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    Page {
        id: repair_id(obj.get("id")),
        title: repair_title(obj.get("title"), DEFAULT_PAGE_TITLE),
        content: repair_content(obj.get("content")),
        tags: repair_tag_refs(obj.get("tags")),
        tag_names: repair_tag_refs(obj.get("tagNames")),
        created_at: repair_timestamp(obj.get("createdAt")),
        password: repair_password(obj.get("password")),
        folder_id: obj
            .get("folderId")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
    }
}

/// Repair a single raw folder. Never fails.
pub fn repair_folder(raw: &Value) -> Folder {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let mut pages = Vec::new();
    if let Some(items) = obj.get("pages").and_then(Value::as_array) {
        for id in items.iter().filter_map(valid_id) {
            if !pages.contains(&id) {
                pages.push(id);
            }
        }
    }

    Folder {
        id: repair_id(obj.get("id")),
        title: repair_title(obj.get("title"), DEFAULT_FOLDER_TITLE),
        kind: FolderKind::Folder,
        pages,
        created_at: repair_timestamp(obj.get("createdAt")),
    }
}

/// Repair a raw record, dispatching on its `type` field.
pub fn repair_entry(raw: &Value) -> Entry {
    if is_folder_record(raw) {
        Entry::Folder(repair_folder(raw))
    } else {
        Entry::Page(repair_page(raw))
    }
}

/// Repair every object in a raw list without synthesizing anything.
///
/// Non-object elements are dropped, colliding ids are re-generated and
/// folder/page references are reconciled. May return an empty list.
pub fn salvage_entries(raw: &Value) -> Vec<Entry> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(items.len());
    for item in items.iter().filter(|v| v.is_object()) {
        let mut entry = repair_entry(item);
        if !seen.insert(entry.id().to_string()) {
            let fresh = new_id();
            match &mut entry {
                Entry::Page(p) => p.id = fresh.clone(),
                Entry::Folder(f) => f.id = fresh.clone(),
            }
            seen.insert(fresh);
        }
        entries.push(entry);
    }

    reconcile_folders(&mut entries);
    entries
}

/// Repair a raw page list. The result is never empty and ids are unique.
pub fn repair_all(raw: &Value) -> Vec<Entry> {
    let mut entries = salvage_entries(raw);
    if entries.is_empty() {
        entries.push(Entry::Page(Page::new(DEFAULT_PAGE_TITLE)));
    }
    entries
}

/// Repair the tag registry: drop nameless entries, dedupe by name.
pub fn repair_tags(raw: &Value) -> Vec<Tag> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    let mut tags: Vec<Tag> = Vec::new();
    for item in items {
        let (name, color) = match item {
            Value::String(name) => (Some(name.as_str()), None),
            Value::Object(obj) => (
                obj.get("name").and_then(Value::as_str),
                obj.get("color").and_then(Value::as_str),
            ),
            _ => (None, None),
        };
        let Some(name) = name.and_then(|n| normalize_label(n, MAX_TAG_LEN)) else {
            continue;
        };
        if tags.iter().any(|t| t.name == name) {
            continue;
        }
        let color = color
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_TAG_COLOR);
        tags.push(Tag {
            name,
            color: color.to_string(),
        });
    }
    tags
}

/// Make folder `pages` sets and page `folderId`s agree.
///
/// A page's `folderId` wins over folder listings; dangling references on
/// either side are dropped.
pub fn reconcile_folders(entries: &mut [Entry]) {
    let page_ids: HashSet<String> = entries
        .iter()
        .filter_map(Entry::as_page)
        .map(|p| p.id.clone())
        .collect();
    let folder_ids: HashSet<String> = entries
        .iter()
        .filter_map(Entry::as_folder)
        .map(|f| f.id.clone())
        .collect();

    // First folder listing each page, used to adopt orphans
    let mut listed_in: HashMap<String, String> = HashMap::new();
    for folder in entries.iter().filter_map(Entry::as_folder) {
        for page_id in folder.pages.iter().filter(|id| page_ids.contains(*id)) {
            listed_in
                .entry(page_id.clone())
                .or_insert_with(|| folder.id.clone());
        }
    }

    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    for page in entries.iter_mut().filter_map(Entry::as_page_mut) {
        if let Some(ref folder_id) = page.folder_id {
            if !folder_ids.contains(folder_id) {
                page.folder_id = None;
            }
        }
        if page.folder_id.is_none() {
            page.folder_id = listed_in.get(&page.id).cloned();
        }
        if let Some(ref folder_id) = page.folder_id {
            members
                .entry(folder_id.clone())
                .or_default()
                .push(page.id.clone());
        }
    }

    for folder in entries.iter_mut().filter_map(Entry::as_folder_mut) {
        let belongs = members.remove(&folder.id).unwrap_or_default();
        folder.pages.retain(|id| belongs.contains(id));
        for id in belongs {
            if !folder.pages.contains(&id) {
                folder.pages.push(id);
            }
        }
    }
}

pub(crate) fn is_folder_record(raw: &Value) -> bool {
    raw.get("type").and_then(Value::as_str) == Some("folder")
}

/// Accept non-blank strings and integers as ids
pub(crate) fn valid_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn repair_id(value: Option<&Value>) -> String {
    value.and_then(valid_id).unwrap_or_else(new_id)
}

fn repair_title(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(Value::as_str)
        .and_then(|t| normalize_label(t, MAX_TITLE_LEN))
        .unwrap_or_else(|| default.to_string())
}

fn repair_content(value: Option<&Value>) -> Content {
    let Some(obj) = value.and_then(Value::as_object) else {
        return Content::empty();
    };

    let time = obj
        .get("time")
        .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
        .unwrap_or_else(now_millis);

    let blocks = obj
        .get("blocks")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(repair_block).collect())
        .unwrap_or_default();

    let version = obj
        .get("version")
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(CONTENT_VERSION)
        .to_string();

    Content {
        time,
        blocks,
        version,
    }
}

/// Known blocks keep their data; unknown ones become paragraphs carrying
/// whatever text could be salvaged. Non-objects are dropped.
fn repair_block(raw: &Value) -> Option<Block> {
    let obj = raw.as_object()?;
    let id = obj.get("id").and_then(Value::as_str).map(str::to_string);
    let data = obj
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    match obj.get("type").and_then(Value::as_str) {
        Some(kind) if KNOWN_BLOCK_TYPES.contains(&kind) => Some(Block {
            id,
            kind: kind.to_string(),
            data,
        }),
        _ => {
            let mut block = Block::paragraph(salvage_text(obj));
            block.id = id;
            Some(block)
        }
    }
}

/// Collect readable text from the usual block fields
fn salvage_text(obj: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let sources = [obj.get("data").and_then(Value::as_object), Some(obj)];

    for source in sources.into_iter().flatten() {
        for key in ["text", "code", "caption", "message", "title", "html"] {
            if let Some(text) = source.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() && !parts.iter().any(|p| p == text) {
                    parts.push(text.to_string());
                }
            }
        }
        if let Some(items) = source.get("items").and_then(Value::as_array) {
            for item in items {
                let text = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(o) => o
                        .get("text")
                        .or_else(|| o.get("content"))
                        .and_then(Value::as_str),
                    _ => None,
                };
                if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                    parts.push(text.to_string());
                }
            }
        }
    }

    parts.join("\n")
}

fn repair_tag_refs(value: Option<&Value>) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(items) = value.and_then(Value::as_array) {
        for name in items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|s| normalize_label(s, MAX_TAG_LEN))
        {
            if !tags.contains(&name) {
                tags.push(name);
            }
        }
    }
    tags
}

/// Parse RFC 3339 strings or epoch milliseconds
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn repair_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value.and_then(parse_timestamp).unwrap_or_else(Utc::now)
}

fn repair_password(value: Option<&Value>) -> Option<PasswordRecord> {
    let obj = value?.as_object()?;
    let hash = obj.get("hash")?.as_str()?;
    let salt = obj.get("salt")?.as_str()?;
    if hash.is_empty() {
        return None;
    }
    Some(PasswordRecord {
        hash: hash.to_string(),
        salt: salt.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(page: &Page) -> Value {
        serde_json::to_value(page).unwrap()
    }

    #[test]
    fn null_content_becomes_empty_block_list() {
        let page = repair_page(&json!({"id": "p1", "title": "Notes", "content": null}));
        assert_eq!(page.id, "p1");
        assert!(page.content.blocks.is_empty());
        assert_eq!(page.content.version, CONTENT_VERSION);
        assert!(page.content.time > 0);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let page = repair_page(&json!({}));
        assert!(!page.id.is_empty());
        assert_eq!(page.title, DEFAULT_PAGE_TITLE);
        assert!(page.tags.is_empty());

        let page = repair_page(&json!("not even an object"));
        assert_eq!(page.title, DEFAULT_PAGE_TITLE);
    }

    #[test]
    fn title_is_truncated() {
        let long = "x".repeat(MAX_TITLE_LEN * 2);
        let page = repair_page(&json!({"id": "a", "title": long}));
        assert_eq!(page.title.chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn unknown_blocks_become_paragraphs_with_salvaged_text() {
        let page = repair_page(&json!({
            "id": "p",
            "title": "t",
            "content": {
                "time": 1700000000000i64,
                "version": "2.20.0",
                "blocks": [
                    {"type": "paragraph", "data": {"text": "kept"}},
                    {"type": "fancyList", "data": {"items": [{"text": "one"}, "two"]}},
                    {"type": "snippet", "data": {"code": "fn main() {}"}},
                    42,
                    null,
                    {"data": {"text": "no type"}}
                ]
            }
        }));

        let blocks = &page.content.blocks;
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].data["text"], "kept");
        assert_eq!(blocks[1].kind, FALLBACK_BLOCK_TYPE);
        assert_eq!(blocks[1].data["text"], "one\ntwo");
        assert_eq!(blocks[2].data["text"], "fn main() {}");
        assert_eq!(blocks[3].data["text"], "no type");
        assert_eq!(page.content.time, 1700000000000);
        assert_eq!(page.content.version, "2.20.0");
    }

    #[test]
    fn non_array_blocks_are_replaced() {
        let page = repair_page(&json!({"id": "p", "content": {"blocks": "oops"}}));
        assert!(page.content.blocks.is_empty());
    }

    #[test]
    fn tags_drop_invalid_entries() {
        let page = repair_page(&json!({
            "id": "p",
            "tags": ["work", "", 7, null, "  ", "work", "home"],
            "tagNames": "not-a-list"
        }));
        assert_eq!(page.tags, vec!["work", "home"]);
        assert!(page.tag_names.is_empty());
    }

    #[test]
    fn created_at_accepts_rfc3339_and_millis() {
        let page = repair_page(&json!({"createdAt": "2024-03-01T10:00:00Z"}));
        assert_eq!(page.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let page = repair_page(&json!({"createdAt": 1700000000000i64}));
        assert_eq!(page.created_at.timestamp_millis(), 1700000000000);

        let before = Utc::now();
        let page = repair_page(&json!({"createdAt": "yesterday-ish"}));
        assert!(page.created_at >= before);
    }

    #[test]
    fn malformed_password_is_dropped() {
        let page = repair_page(&json!({"password": {"hash": "abc", "salt": "def"}}));
        assert!(page.is_locked());
        let page = repair_page(&json!({"password": "plaintext"}));
        assert!(!page.is_locked());
    }

    #[test]
    fn repair_is_idempotent() {
        let inputs = vec![
            json!({"id": 1}),
            json!({"title": format!("  {}  ", "y ".repeat(150)), "content": {"blocks": [{"type": "weird", "text": "t"}]}}),
            json!({"id": "x", "tags": ["a", "a", " b "], "createdAt": 5}),
            json!(null),
        ];
        for raw in inputs {
            let once = repair_page(&raw);
            let twice = repair_page(&roundtrip(&once));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn repair_all_never_empty() {
        for raw in [json!([]), json!(null), json!("junk"), json!([1, 2, "x"])] {
            let entries = repair_all(&raw);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].title(), DEFAULT_PAGE_TITLE);
        }
    }

    #[test]
    fn repair_all_keeps_null_content_page() {
        let entries = repair_all(&json!([{"id": "keep", "title": "Keep me", "content": null}]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "keep");
    }

    #[test]
    fn repair_all_dedupes_ids() {
        let entries = repair_all(&json!([
            {"id": "same", "title": "one"},
            {"id": "same", "title": "two"},
            {"id": "same", "type": "folder", "title": "three"}
        ]));
        let ids: HashSet<&str> = entries.iter().map(Entry::id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(entries[0].id(), "same");
    }

    #[test]
    fn folders_are_reconciled() {
        let entries = repair_all(&json!([
            {"id": "f1", "type": "folder", "title": "Work", "pages": ["p1", "ghost", "p2"]},
            {"id": "p1", "title": "listed and linked", "folderId": "f1"},
            {"id": "p2", "title": "listed only"},
            {"id": "p3", "title": "linked only", "folderId": "f1"},
            {"id": "p4", "title": "dangling", "folderId": "missing"}
        ]));

        let folder = entries[0].as_folder().unwrap();
        assert_eq!(folder.pages, vec!["p1", "p2", "p3"]);
        assert_eq!(entries[2].as_page().unwrap().folder_id.as_deref(), Some("f1"));
        assert!(entries[4].as_page().unwrap().folder_id.is_none());

        let again = repair_all(&serde_json::to_value(&entries).unwrap());
        assert_eq!(entries, again);
    }

    #[test]
    fn tags_registry_is_deduped() {
        let tags = repair_tags(&json!([
            {"name": "work", "color": "#ff0000"},
            {"name": "work", "color": "#00ff00"},
            "home",
            {"color": "#000"},
            {"name": "  "}
        ]));
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].color, "#ff0000");
        assert_eq!(tags[1].name, "home");
        assert_eq!(tags[1].color, DEFAULT_TAG_COLOR);

        assert!(repair_tags(&json!({"not": "a list"})).is_empty());
    }
}
