//! Read-only corruption diagnostics

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use super::repair::{is_folder_record, parse_timestamp, valid_id, KNOWN_BLOCK_TYPES};
use crate::models::{normalize_label, MAX_TAG_LEN, MAX_TITLE_LEN};

/// Result of [`detect_corruption`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptionReport {
    pub is_corrupt: bool,
    pub issues: Vec<String>,
}

impl CorruptionReport {
    fn push(&mut self, issue: impl Into<String>) {
        self.is_corrupt = true;
        self.issues.push(issue.into());
    }
}

/// Enumerate every structural problem in a raw page list.
///
/// Anything [`super::repair_all`] would change is reported; its output
/// therefore reports no issues.
pub fn detect_corruption(data: &Value) -> CorruptionReport {
    let mut report = CorruptionReport::default();

    let Some(items) = data.as_array() else {
        report.push("page list is not an array");
        return report;
    };

    let mut ids = HashSet::new();
    let mut folders: HashMap<String, Vec<String>> = HashMap::new();
    let mut page_folders: HashMap<String, Option<String>> = HashMap::new();

    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            report.push(format!("entry {}: not an object", i));
            continue;
        };

        let label = match obj.get("id").and_then(valid_id) {
            Some(id) => {
                if !ids.insert(id.clone()) {
                    report.push(format!("entry {}: duplicate id {}", i, id));
                }
                id
            }
            None => {
                report.push(format!("entry {}: missing id", i));
                format!("#{}", i)
            }
        };
        if matches!(obj.get("id"), Some(Value::Number(_))) {
            report.push(format!("entry {}: numeric id", label));
        }

        check_title(obj, &label, &mut report);
        check_timestamp(obj, &label, &mut report);

        if is_folder_record(item) {
            let pages = check_folder_pages(obj, &label, &mut report);
            folders.insert(label, pages);
        } else {
            check_content(obj.get("content"), &label, &mut report);
            check_tag_list(obj, "tags", &label, &mut report);
            check_tag_list(obj, "tagNames", &label, &mut report);
            check_password(obj, &label, &mut report);
            let folder_id = match obj.get("folderId") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
                Some(_) => {
                    report.push(format!("page {}: invalid folderId", label));
                    None
                }
            };
            page_folders.insert(label, folder_id);
        }
    }

    check_folder_links(&folders, &page_folders, &mut report);
    report
}

fn check_title(obj: &Map<String, Value>, label: &str, report: &mut CorruptionReport) {
    match obj.get("title").and_then(Value::as_str) {
        None => report.push(format!("entry {}: missing title", label)),
        Some(title) => match normalize_label(title, MAX_TITLE_LEN) {
            None => report.push(format!("entry {}: empty title", label)),
            Some(normal) if normal != title => {
                report.push(format!("entry {}: title not normalized", label))
            }
            Some(_) => {}
        },
    }
}

fn check_timestamp(obj: &Map<String, Value>, label: &str, report: &mut CorruptionReport) {
    if obj.get("createdAt").and_then(parse_timestamp).is_none() {
        report.push(format!("entry {}: invalid createdAt", label));
    }
}

fn check_content(content: Option<&Value>, label: &str, report: &mut CorruptionReport) {
    let Some(content) = content.and_then(Value::as_object) else {
        report.push(format!("page {}: missing content", label));
        return;
    };

    if !content.get("time").is_some_and(Value::is_number) {
        report.push(format!("page {}: content time is not a number", label));
    }
    if !content
        .get("version")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.trim().is_empty())
    {
        report.push(format!("page {}: missing content version", label));
    }

    let Some(blocks) = content.get("blocks").and_then(Value::as_array) else {
        report.push(format!("page {}: blocks is not an array", label));
        return;
    };
    for (i, block) in blocks.iter().enumerate() {
        let Some(block) = block.as_object() else {
            report.push(format!("page {}: block {} is not an object", label, i));
            continue;
        };
        match block.get("type").and_then(Value::as_str) {
            Some(kind) if KNOWN_BLOCK_TYPES.contains(&kind) => {}
            Some(kind) => report.push(format!(
                "page {}: block {} has unknown type {}",
                label, i, kind
            )),
            None => report.push(format!("page {}: block {} has no type", label, i)),
        }
        if !matches!(block.get("data"), None | Some(Value::Object(_))) {
            report.push(format!("page {}: block {} data is not an object", label, i));
        }
        if !matches!(block.get("id"), None | Some(Value::String(_))) {
            report.push(format!("page {}: block {} has invalid id", label, i));
        }
    }
}

fn check_tag_list(obj: &Map<String, Value>, key: &str, label: &str, report: &mut CorruptionReport) {
    let Some(value) = obj.get(key) else {
        return;
    };
    let Some(items) = value.as_array() else {
        report.push(format!("page {}: {} is not an array", label, key));
        return;
    };
    let mut seen = HashSet::new();
    for item in items {
        match item.as_str() {
            Some(tag) if normalize_label(tag, MAX_TAG_LEN).as_deref() == Some(tag) => {
                if !seen.insert(tag) {
                    report.push(format!("page {}: duplicate entry in {}", label, key));
                }
            }
            _ => report.push(format!("page {}: invalid entry in {}", label, key)),
        }
    }
}

fn check_password(obj: &Map<String, Value>, label: &str, report: &mut CorruptionReport) {
    let Some(password) = obj.get("password") else {
        return;
    };
    if password.is_null() {
        return;
    }
    let valid = password
        .get("hash")
        .and_then(Value::as_str)
        .is_some_and(|h| !h.is_empty())
        && password.get("salt").is_some_and(Value::is_string);
    if !valid {
        report.push(format!("page {}: malformed password record", label));
    }
}

fn check_folder_pages(
    obj: &Map<String, Value>,
    label: &str,
    report: &mut CorruptionReport,
) -> Vec<String> {
    let Some(items) = obj.get("pages") else {
        return Vec::new();
    };
    let Some(items) = items.as_array() else {
        report.push(format!("folder {}: pages is not an array", label));
        return Vec::new();
    };

    let mut pages = Vec::new();
    for item in items {
        match item.as_str().filter(|s| !s.trim().is_empty()) {
            Some(id) if pages.iter().any(|p| p == id) => {
                report.push(format!("folder {}: page {} listed twice", label, id))
            }
            Some(id) => pages.push(id.to_string()),
            None => report.push(format!("folder {}: invalid page reference", label)),
        }
    }
    pages
}

fn check_folder_links(
    folders: &HashMap<String, Vec<String>>,
    page_folders: &HashMap<String, Option<String>>,
    report: &mut CorruptionReport,
) {
    let mut folder_ids: Vec<&String> = folders.keys().collect();
    folder_ids.sort();

    for folder_id in folder_ids {
        for page_id in &folders[folder_id] {
            match page_folders.get(page_id) {
                None => report.push(format!(
                    "folder {}: references missing page {}",
                    folder_id, page_id
                )),
                Some(Some(owner)) if owner == folder_id => {}
                Some(_) => report.push(format!(
                    "folder {}: lists page {} that belongs elsewhere",
                    folder_id, page_id
                )),
            }
        }
    }

    let mut page_ids: Vec<&String> = page_folders.keys().collect();
    page_ids.sort();

    for page_id in page_ids {
        if let Some(Some(folder_id)) = page_folders.get(page_id) {
            match folders.get(folder_id) {
                None => report.push(format!(
                    "page {}: references missing folder {}",
                    page_id, folder_id
                )),
                Some(pages) if !pages.contains(page_id) => report.push(format!(
                    "page {}: not listed by folder {}",
                    page_id, folder_id
                )),
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::repair_all;
    use serde_json::json;

    #[test]
    fn reports_structural_problems() {
        let report = detect_corruption(&json!([
            {"id": 1},
            "garbage",
            null,
            {"id": "p", "title": "ok", "createdAt": "2024-01-01T00:00:00Z", "content": {"time": 1, "version": "2", "blocks": "nope"}}
        ]));
        assert!(report.is_corrupt);
        assert!(report.issues.iter().any(|i| i.contains("missing title")));
        assert!(report.issues.iter().any(|i| i.contains("not an object")));
        assert!(report.issues.iter().any(|i| i.contains("blocks is not an array")));
    }

    #[test]
    fn non_array_is_corrupt() {
        let report = detect_corruption(&json!({"pages": []}));
        assert!(report.is_corrupt);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn repaired_output_is_clean() {
        let raw = json!([{"id": 1}, "garbage", null]);
        let repaired = serde_json::to_value(repair_all(&raw)).unwrap();
        let report = detect_corruption(&repaired);
        assert!(!report.is_corrupt, "issues: {:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn repaired_messy_input_is_clean() {
        let raw = json!([
            {"id": "f", "type": "folder", "title": "  Folder ", "pages": ["a", "ghost", 3]},
            {"id": "a", "title": "x".repeat(400), "tags": ["t", "t", ""], "folderId": "nowhere"},
            {"id": "a", "content": {"blocks": [{"type": "mystery", "data": {"text": "hi"}}, 5]}},
            {"title": "linked", "folderId": "f", "password": {"hash": 1}}
        ]);
        let repaired = serde_json::to_value(repair_all(&raw)).unwrap();
        let report = detect_corruption(&repaired);
        assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
    }

    #[test]
    fn detects_folder_mismatch() {
        let report = detect_corruption(&json!([
            {"id": "f", "type": "folder", "title": "F", "pages": ["p"], "createdAt": 0},
            {"id": "p", "title": "P", "createdAt": 0, "content": {"time": 0, "version": "1", "blocks": []}}
        ]));
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("belongs elsewhere"));
    }

    #[test]
    fn detection_does_not_mutate() {
        let raw = json!([{"id": 1}]);
        let before = raw.clone();
        let _ = detect_corruption(&raw);
        assert_eq!(raw, before);
    }
}
