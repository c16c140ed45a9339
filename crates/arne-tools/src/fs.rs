// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{OnUpdate, Tool, ToolResult};

/// Resolve a possibly-relative path against the session working directory.
fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

// ─── read_file ────────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    cwd: PathBuf,
}

impl ReadFileTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn label(&self) -> &str {
        "Read file"
    }
    fn description(&self) -> &str {
        "Read a text file. Optional offset/limit select a line range \
         (1-based offset). Prefer this over shell cat/head/tail."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path (absolute or relative to cwd)" },
                "offset": { "type": "integer", "description": "First line to read, 1-based (optional)" },
                "limit": { "type": "integer", "description": "Maximum number of lines (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _id: &str,
        args: &Value,
        _abort: CancellationToken,
        _on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'path'");
        };
        let full = resolve(&self.cwd, path);
        debug!(path = %full.display(), "read_file tool");
        let content = match std::fs::read_to_string(&full) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("cannot read {}: {e}", full.display())),
        };
        let offset = args.get("offset").and_then(Value::as_u64).map(|o| o.max(1) as usize);
        let limit = args.get("limit").and_then(Value::as_u64).map(|l| l as usize);
        let out = match (offset, limit) {
            (None, None) => content,
            (o, l) => {
                let skip = o.unwrap_or(1) - 1;
                let take = l.unwrap_or(usize::MAX);
                content
                    .lines()
                    .skip(skip)
                    .take(take)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        ToolResult::ok(out)
    }
}

// ─── write_file ───────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    cwd: PathBuf,
}

impl WriteFileTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn label(&self) -> &str {
        "Write file"
    }
    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites an existing file."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path (absolute or relative to cwd)" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _id: &str,
        args: &Value,
        _abort: CancellationToken,
        _on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'path'");
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'content'");
        };
        let full = resolve(&self.cwd, path);
        debug!(path = %full.display(), bytes = content.len(), "write_file tool");
        if let Some(parent) = full.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("cannot create {}: {e}", parent.display()));
            }
        }
        match std::fs::write(&full, content) {
            Ok(()) => ToolResult::ok(format!("wrote {} bytes to {}", content.len(), full.display())),
            Err(e) => ToolResult::error(format!("cannot write {}: {e}", full.display())),
        }
    }
}

// ─── edit_file ────────────────────────────────────────────────────────────────

pub struct EditFileTool {
    cwd: PathBuf,
}

impl EditFileTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn label(&self) -> &str {
        "Edit file"
    }
    fn description(&self) -> &str {
        "Replace one occurrence of old_text with new_text in a file. \
         old_text must match exactly once; include enough surrounding \
         context to make it unique."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path (absolute or relative to cwd)" },
                "old_text": { "type": "string", "description": "Exact text to replace (must be unique)" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _id: &str,
        args: &Value,
        _abort: CancellationToken,
        _on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'path'");
        };
        let Some(old_text) = args.get("old_text").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'old_text'");
        };
        let Some(new_text) = args.get("new_text").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'new_text'");
        };
        if old_text.is_empty() {
            return ToolResult::error("'old_text' must not be empty");
        }
        let full = resolve(&self.cwd, path);
        debug!(path = %full.display(), "edit_file tool");
        let content = match std::fs::read_to_string(&full) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("cannot read {}: {e}", full.display())),
        };
        let matches = content.matches(old_text).count();
        match matches {
            0 => ToolResult::error(format!("old_text not found in {}", full.display())),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                match std::fs::write(&full, updated) {
                    Ok(()) => ToolResult::ok(format!("edited {}", full.display())),
                    Err(e) => ToolResult::error(format!("cannot write {}: {e}", full.display())),
                }
            }
            n => ToolResult::error(format!(
                "old_text matches {n} times in {}; add surrounding context to make it unique",
                full.display()
            )),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::no_update;

    async fn run(tool: &dyn Tool, args: Value) -> ToolResult {
        tool.execute("t1", &args, CancellationToken::new(), &no_update()).await
    }

    // ── read_file ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_whole_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let t = ReadFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt"})).await;
        assert_eq!(out.text(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "1\n2\n3\n4\n5\n").unwrap();
        let t = ReadFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt", "offset": 2, "limit": 2})).await;
        assert_eq!(out.text(), "2\n3");
    }

    #[tokio::test]
    async fn read_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let t = ReadFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "absent.txt"})).await;
        assert!(out.is_error);
    }

    // ── write_file ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let t = WriteFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "deep/nested/file.txt", "content": "hello"})).await;
        assert!(!out.is_error, "{}", out.text());
        let written = std::fs::read_to_string(tmp.path().join("deep/nested/file.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "old").unwrap();
        let t = WriteFileTool::new(tmp.path());
        run(&t, json!({"path": "f.txt", "content": "new"})).await;
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(), "new");
    }

    // ── edit_file ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn edit_replaces_unique_match() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "fn main() { old(); }").unwrap();
        let t = EditFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt", "old_text": "old()", "new_text": "new()"})).await;
        assert!(!out.is_error, "{}", out.text());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "fn main() { new(); }"
        );
    }

    #[tokio::test]
    async fn edit_rejects_zero_matches() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "content").unwrap();
        let t = EditFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt", "old_text": "missing", "new_text": "x"})).await;
        assert!(out.is_error);
        assert!(out.text().contains("not found"));
    }

    #[tokio::test]
    async fn edit_rejects_multiple_matches() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "dup dup").unwrap();
        let t = EditFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt", "old_text": "dup", "new_text": "x"})).await;
        assert!(out.is_error);
        assert!(out.text().contains("2 times"));
        // File unchanged on rejection.
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(), "dup dup");
    }

    #[tokio::test]
    async fn edit_rejects_empty_old_text() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "content").unwrap();
        let t = EditFileTool::new(tmp.path());
        let out = run(&t, json!({"path": "f.txt", "old_text": "", "new_text": "x"})).await;
        assert!(out.is_error);
    }
}
