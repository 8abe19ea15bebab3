// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The `filesystem` service: read, write, edit, edit_search.
//!
//! Edits locate `oldText` exactly first, then fall back to a fuzzy
//! line-window search; a window is accepted when its similarity reaches the
//! configured threshold.  `edit` and `edit_search` accept either a single
//! `filePath` or a `files` array (the scheduler serializes per path).

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

const READ_LINE_CAP: usize = 2_000;

/// Paths a call will touch, for snapshotting and per-path serialization.
/// Single `filePath` and `files` arrays are both understood.
pub fn file_paths_of(args: &Value) -> Vec<String> {
    if let Some(p) = args.get("filePath").and_then(Value::as_str) {
        return vec![p.to_string()];
    }
    args.get("files")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Similarity ratio in [0,1] using a character-level diff.
fn similarity_ratio(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f32 / total as f32
}

/// Replace `old_text` in `content`, exactly or fuzzily.
///
/// Fuzzy path: slide a window of `old_text`'s line count over the file and
/// take the best-scoring window at or above `threshold`.
fn apply_edit(
    content: &str,
    old_text: &str,
    new_text: &str,
    threshold: f32,
) -> Result<String, String> {
    if let Some(pos) = content.find(old_text) {
        let mut out = String::with_capacity(content.len());
        out.push_str(&content[..pos]);
        out.push_str(new_text);
        out.push_str(&content[pos + old_text.len()..]);
        return Ok(out);
    }

    let file_lines: Vec<&str> = content.lines().collect();
    let old_lines: Vec<&str> = old_text.lines().collect();
    let n = old_lines.len().max(1);
    if file_lines.len() < n {
        return Err("oldText is longer than the file".to_string());
    }

    let needle = old_lines.join("\n");
    let mut best: Option<(f32, usize)> = None;
    for start in 0..=(file_lines.len() - n) {
        let window = file_lines[start..start + n].join("\n");
        let ratio = similarity_ratio(&needle, &window);
        if ratio >= threshold && best.map(|(r, _)| ratio > r).unwrap_or(true) {
            best = Some((ratio, start));
        }
    }

    let Some((ratio, start)) = best else {
        return Err(format!(
            "oldText not found (no window reached {:.0}% similarity). \
             Re-read the file and retry with exact content.",
            threshold * 100.0
        ));
    };
    debug!(ratio, start, "fuzzy edit window accepted");

    let had_trailing_newline = content.ends_with('\n');
    let mut out_lines: Vec<String> = file_lines[..start].iter().map(|s| s.to_string()).collect();
    out_lines.extend(new_text.lines().map(str::to_string));
    out_lines.extend(file_lines[start + n..].iter().map(|s| s.to_string()));
    let mut out = out_lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    Ok(out)
}

// ─── filesystem-read ─────────────────────────────────────────────────────────

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "filesystem-read"
    }

    fn description(&self) -> &str {
        "Read a file from disk. Supports optional 1-based 'offset' and 'limit' \
         line windows for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": "Path to the file" },
                "offset": { "type": "integer", "description": "1-based first line to return" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["filePath"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let path = match call.args.get("filePath").and_then(Value::as_str) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required field: filePath"),
        };
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let offset = call
            .args
            .get("offset")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = call
            .args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(READ_LINE_CAP);

        let window: Vec<&str> = content.lines().skip(offset).take(limit).collect();
        ToolOutput::ok(&call.id, window.join("\n"))
    }
}

// ─── filesystem-write ────────────────────────────────────────────────────────

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "filesystem-write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories \
         are created as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["filePath", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let path = match call.args.get("filePath").and_then(Value::as_str) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required field: filePath"),
        };
        let content = match call.args.get("content").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required field: content"),
        };
        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        match tokio::fs::write(&path, &content).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── filesystem-edit ─────────────────────────────────────────────────────────

pub struct EditFileTool {
    /// Minimum similarity for the fuzzy fallback (config
    /// `editSimilarityThreshold`).
    pub similarity_threshold: f32,
}

impl Default for EditFileTool {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "filesystem-edit"
    }

    fn description(&self) -> &str {
        "Replace 'oldText' with 'newText' in one file ('filePath') or several \
         ('files'). oldText should match the file exactly; close matches are \
         located fuzzily. Re-read the file after a failed edit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": "Single file to edit" },
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Multiple files to apply the same edit to"
                },
                "oldText": { "type": "string" },
                "newText": { "type": "string" }
            },
            "required": ["oldText", "newText"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let old_text = match call.args.get("oldText").and_then(Value::as_str) {
            Some(s) => s,
            None => return ToolOutput::err(&call.id, "missing required field: oldText"),
        };
        let new_text = call
            .args
            .get("newText")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let paths = file_paths_of(&call.args);
        if paths.is_empty() {
            return ToolOutput::err(&call.id, "missing required field: filePath (or files)");
        }

        let mut notes = Vec::new();
        for path in &paths {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(e) => return ToolOutput::err(&call.id, format!("{path}: read error: {e}")),
            };
            let updated = match apply_edit(&content, old_text, new_text, self.similarity_threshold)
            {
                Ok(u) => u,
                Err(e) => return ToolOutput::err(&call.id, format!("{path}: {e}")),
            };
            if let Err(e) = tokio::fs::write(path, &updated).await {
                return ToolOutput::err(&call.id, format!("{path}: write error: {e}"));
            }
            notes.push(format!("{path}: edit applied"));
        }
        ToolOutput::ok(&call.id, notes.join("\n"))
    }
}

// ─── filesystem-edit_search ──────────────────────────────────────────────────

pub struct EditSearchTool;

#[async_trait]
impl Tool for EditSearchTool {
    fn name(&self) -> &str {
        "filesystem-edit_search"
    }

    fn description(&self) -> &str {
        "Regex search-and-replace across one file ('filePath') or several \
         ('files'). 'pattern' is a Rust regex; '$1'-style capture references \
         are allowed in 'replacement'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string" },
                "files": { "type": "array", "items": { "type": "string" } },
                "pattern": { "type": "string" },
                "replacement": { "type": "string" }
            },
            "required": ["pattern", "replacement"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(Value::as_str) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required field: pattern"),
        };
        let replacement = call
            .args
            .get("replacement")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let re = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
        };
        let paths = file_paths_of(&call.args);
        if paths.is_empty() {
            return ToolOutput::err(&call.id, "missing required field: filePath (or files)");
        }

        let mut notes = Vec::new();
        for path in &paths {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(e) => return ToolOutput::err(&call.id, format!("{path}: read error: {e}")),
            };
            let count = re.find_iter(&content).count();
            if count == 0 {
                notes.push(format!("{path}: no matches"));
                continue;
            }
            let updated = re.replace_all(&content, replacement).into_owned();
            if let Err(e) = tokio::fs::write(path, &updated).await {
                return ToolOutput::err(&call.id, format!("{path}: write error: {e}"));
            }
            notes.push(format!("{path}: {count} replacement(s)"));
        }
        ToolOutput::ok(&call.id, notes.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "f1".into(),
            name: name.into(),
            args,
        }
    }

    fn tmp(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, content).unwrap();
        (dir, path.to_string_lossy().into_owned())
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    // ── file_paths_of ─────────────────────────────────────────────────────────

    #[test]
    fn single_file_path_is_extracted() {
        assert_eq!(
            file_paths_of(&json!({"filePath": "a.txt"})),
            vec!["a.txt"]
        );
    }

    #[test]
    fn files_array_is_extracted() {
        assert_eq!(
            file_paths_of(&json!({"files": ["a.txt", "b.txt"]})),
            vec!["a.txt", "b.txt"]
        );
    }

    #[test]
    fn no_paths_yields_empty() {
        assert!(file_paths_of(&json!({"pattern": "x"})).is_empty());
    }

    // ── read ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_returns_content() {
        let (_d, path) = tmp("hello\nworld\n");
        let out = ReadFileTool
            .execute(&call("filesystem-read", json!({"filePath": path})), &token())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hello\nworld");
    }

    #[tokio::test]
    async fn read_offset_and_limit_window() {
        let (_d, path) = tmp("l1\nl2\nl3\nl4\n");
        let out = ReadFileTool
            .execute(
                &call("filesystem-read", json!({"filePath": path, "offset": 2, "limit": 2})),
                &token(),
            )
            .await;
        assert_eq!(out.content, "l2\nl3");
    }

    #[tokio::test]
    async fn read_missing_file_is_error() {
        let out = ReadFileTool
            .execute(
                &call("filesystem-read", json!({"filePath": "/no/such/file"})),
                &token(),
            )
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_missing_arg_is_structured_error() {
        let out = ReadFileTool
            .execute(&call("filesystem-read", json!({})), &token())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("filePath"));
    }

    // ── write ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/out.txt");
        let out = WriteFileTool
            .execute(
                &call(
                    "filesystem-write",
                    json!({"filePath": path.to_string_lossy(), "content": "data"}),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "data");
    }

    // ── edit ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn exact_edit_replaces_once() {
        let (_d, path) = tmp("fn foo() {\n    old();\n}\n");
        let out = EditFileTool::default()
            .execute(
                &call(
                    "filesystem-edit",
                    json!({"filePath": path, "oldText": "    old();", "newText": "    new();"}),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(&path).unwrap();
        assert!(result.contains("new()"));
        assert!(!result.contains("old()"));
    }

    #[tokio::test]
    async fn fuzzy_edit_tolerates_minor_drift() {
        // File says u64, oldText says u32 — close enough at 85%.
        let (_d, path) = tmp("fn process(id: u64) {\n    update(id);\n}\n");
        let out = EditFileTool::default()
            .execute(
                &call(
                    "filesystem-edit",
                    json!({
                        "filePath": path,
                        "oldText": "fn process(id: u32) {\n    update(id);\n}",
                        "newText": "fn process(id: u64) {\n    update(id);\n    log(id);\n}"
                    }),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(std::fs::read_to_string(&path).unwrap().contains("log(id)"));
    }

    #[tokio::test]
    async fn edit_below_threshold_fails_with_guidance() {
        let (_d, path) = tmp("completely unrelated content\n");
        let out = EditFileTool::default()
            .execute(
                &call(
                    "filesystem-edit",
                    json!({"filePath": path, "oldText": "struct Widget { a: u8 }", "newText": "x"}),
                ),
                &token(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Re-read"));
        // File untouched on failure.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "completely unrelated content\n"
        );
    }

    #[tokio::test]
    async fn edit_files_array_touches_each() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "marker\n").unwrap();
        std::fs::write(&b, "marker\n").unwrap();
        let out = EditFileTool::default()
            .execute(
                &call(
                    "filesystem-edit",
                    json!({
                        "files": [a.to_string_lossy(), b.to_string_lossy()],
                        "oldText": "marker",
                        "newText": "done"
                    }),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "done\n");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "done\n");
    }

    #[tokio::test]
    async fn edit_trailing_newline_preserved_on_fuzzy_path() {
        let (_d, path) = tmp("alpha\nbeta\ngamma\n");
        let out = EditFileTool::default()
            .execute(
                &call(
                    "filesystem-edit",
                    json!({"filePath": path, "oldText": "betA", "newText": "BETA"}),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(&path).unwrap();
        assert!(result.ends_with('\n'));
        assert_eq!(result, "alpha\nBETA\ngamma\n");
    }

    // ── edit_search ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn edit_search_replaces_all_matches() {
        let (_d, path) = tmp("foo(1); foo(2); bar(3);\n");
        let out = EditSearchTool
            .execute(
                &call(
                    "filesystem-edit_search",
                    json!({"filePath": path, "pattern": r"foo\((\d)\)", "replacement": "baz($1)"}),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("2 replacement(s)"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "baz(1); baz(2); bar(3);\n"
        );
    }

    #[tokio::test]
    async fn edit_search_invalid_regex_is_error() {
        let (_d, path) = tmp("x\n");
        let out = EditSearchTool
            .execute(
                &call(
                    "filesystem-edit_search",
                    json!({"filePath": path, "pattern": "([", "replacement": ""}),
                ),
                &token(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn edit_search_reports_no_matches() {
        let (_d, path) = tmp("nothing here\n");
        let out = EditSearchTool
            .execute(
                &call(
                    "filesystem-edit_search",
                    json!({"filePath": path, "pattern": "zzz", "replacement": "y"}),
                ),
                &token(),
            )
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("no matches"));
    }

    // ── similarity helpers ────────────────────────────────────────────────────

    #[test]
    fn similarity_identical_is_one() {
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
    }

    #[test]
    fn similarity_unrelated_is_low() {
        assert!(similarity_ratio("aaaa", "bbbb") < 0.1);
    }

    #[test]
    fn apply_edit_prefers_exact_match() {
        let out = apply_edit("one two three", "two", "2", 0.5).unwrap();
        assert_eq!(out, "one 2 three");
    }
}
