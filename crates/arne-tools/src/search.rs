// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File discovery (glob) and content search (grep) tools.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{OnUpdate, Tool, ToolResult};

/// Directories that are never worth searching.
const EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules"];

// ─── glob ─────────────────────────────────────────────────────────────────────

pub struct GlobTool {
    cwd: PathBuf,
}

impl GlobTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }
    fn label(&self) -> &str {
        "Find files"
    }
    fn description(&self) -> &str {
        "Find files whose path matches a glob pattern, sorted by modification \
         time (newest first). Excludes .git/, target/ and node_modules/.\n\
         Examples: *.rs | src/**/*.rs | **/Cargo.toml"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern, e.g. '**/*.rs'" },
                "root": { "type": "string", "description": "Directory to search from (default: cwd)" },
                "max_results": { "type": "integer", "description": "Maximum results (default 200)" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _id: &str,
        args: &Value,
        abort: CancellationToken,
        _on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'pattern'");
        };
        let root = args
            .get("root")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.cwd.clone());
        let max = args.get("max_results").and_then(Value::as_u64).unwrap_or(200) as usize;

        debug!(pattern, root = %root.display(), "glob tool");

        // A bare file pattern means "anywhere below root".
        let normalized = if pattern.contains('/') {
            pattern.to_string()
        } else {
            format!("**/{pattern}")
        };
        let regex = match glob_to_regex(&normalized) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("invalid pattern: {e}")),
        };

        let mut matches: Vec<(std::time::SystemTime, String)> = Vec::new();
        for dirent in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_excluded(e))
            .filter_map(Result::ok)
        {
            if abort.is_cancelled() {
                return ToolResult::error("aborted");
            }
            if !dirent.file_type().is_file() {
                continue;
            }
            let rel = dirent
                .path()
                .strip_prefix(&root)
                .unwrap_or(dirent.path())
                .to_string_lossy()
                .to_string();
            if regex.is_match(&rel) {
                let mtime = std::fs::metadata(dirent.path())
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                matches.push((mtime, rel));
            }
        }
        matches.sort_by(|a, b| b.0.cmp(&a.0));
        matches.truncate(max);

        if matches.is_empty() {
            ToolResult::ok("(no matches)")
        } else {
            ToolResult::ok(matches.into_iter().map(|(_, p)| p).collect::<Vec<_>>().join("\n"))
        }
    }
}

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| EXCLUDED_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Translate a glob pattern into an anchored regex.
/// `**/` matches any number of directories (including none), `*` matches
/// within one path segment, `?` matches one character.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so `**/` also matches zero dirs.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:[^/]+/)*");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '{' => re.push_str("(?:"),
            '}' => re.push(')'),
            ',' => re.push('|'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}

// ─── grep ─────────────────────────────────────────────────────────────────────

pub struct GrepTool {
    cwd: PathBuf,
}

impl GrepTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }
    fn label(&self) -> &str {
        "Search content"
    }
    fn description(&self) -> &str {
        "Regex content search across files. Shows file:line:text matches.\n\
         include: glob filter on file names (e.g. '*.rs'). limit: 100 by \
         default. Excludes .git/, target/ and node_modules/."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "File or directory to search (default: cwd)" },
                "include": { "type": "string", "description": "Glob filter on file names, e.g. '*.rs'" },
                "limit": { "type": "integer", "description": "Maximum matches (default 100)" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _id: &str,
        args: &Value,
        abort: CancellationToken,
        _on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'pattern'");
        };
        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("invalid pattern: {e}")),
        };
        let root = args
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.cwd.clone());
        let include = match args.get("include").and_then(Value::as_str) {
            Some(g) => match glob_to_regex(&format!("**/{g}")) {
                Ok(r) => Some(r),
                Err(e) => return ToolResult::error(format!("invalid include glob: {e}")),
            },
            None => None,
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;

        debug!(pattern, root = %root.display(), "grep tool");

        let mut out = Vec::new();
        'files: for dirent in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !is_excluded(e))
            .filter_map(Result::ok)
        {
            if abort.is_cancelled() {
                return ToolResult::error("aborted");
            }
            if !dirent.file_type().is_file() {
                continue;
            }
            let rel = dirent
                .path()
                .strip_prefix(&root)
                .unwrap_or(dirent.path())
                .to_string_lossy()
                .to_string();
            if let Some(inc) = &include {
                if !inc.is_match(&rel) {
                    continue;
                }
            }
            // Binary and unreadable files are silently skipped.
            let Ok(content) = std::fs::read_to_string(dirent.path()) else { continue };
            for (lineno, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    out.push(format!("{rel}:{}:{line}", lineno + 1));
                    if out.len() >= limit {
                        out.push(format!("[... limit of {limit} matches reached ...]"));
                        break 'files;
                    }
                }
            }
        }

        if out.is_empty() {
            ToolResult::ok("(no matches)")
        } else {
            ToolResult::ok(out.join("\n"))
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

    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/deep")).unwrap();
        std::fs::create_dir_all(tmp.path().join("target")).unwrap();
        std::fs::write(tmp.path().join("src/main.rs"), "fn main() { start(); }\n").unwrap();
        std::fs::write(tmp.path().join("src/deep/util.rs"), "pub fn start() {}\n").unwrap();
        std::fs::write(tmp.path().join("README.md"), "start here\n").unwrap();
        std::fs::write(tmp.path().join("target/gen.rs"), "fn start() {}\n").unwrap();
        tmp
    }

    // ── glob ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn glob_finds_files_recursively() {
        let tmp = fixture();
        let t = GlobTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "*.rs"})).await;
        let text = out.text();
        assert!(text.contains("src/main.rs"), "{text}");
        assert!(text.contains("src/deep/util.rs"), "{text}");
    }

    #[tokio::test]
    async fn glob_excludes_target_dir() {
        let tmp = fixture();
        let t = GlobTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "*.rs"})).await;
        assert!(!out.text().contains("target/gen.rs"));
    }

    #[tokio::test]
    async fn glob_with_directory_pattern() {
        let tmp = fixture();
        let t = GlobTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "src/**/*.rs"})).await;
        let text = out.text();
        assert!(text.contains("src/main.rs"));
        assert!(text.contains("src/deep/util.rs"));
        assert!(!text.contains("README"));
    }

    #[tokio::test]
    async fn glob_no_matches_reports_cleanly() {
        let tmp = fixture();
        let t = GlobTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "*.zig"})).await;
        assert_eq!(out.text(), "(no matches)");
    }

    #[test]
    fn glob_to_regex_star_stays_within_segment() {
        let r = glob_to_regex("src/*.rs").unwrap();
        assert!(r.is_match("src/main.rs"));
        assert!(!r.is_match("src/deep/util.rs"));
    }

    #[test]
    fn glob_to_regex_doublestar_spans_segments() {
        let r = glob_to_regex("**/*.rs").unwrap();
        assert!(r.is_match("main.rs"));
        assert!(r.is_match("a/b/c/main.rs"));
        assert!(!r.is_match("main.md"));
    }

    #[test]
    fn glob_to_regex_braces_alternate() {
        let r = glob_to_regex("**/*.{yml,yaml}").unwrap();
        assert!(r.is_match("ci/build.yml"));
        assert!(r.is_match("build.yaml"));
        assert!(!r.is_match("build.toml"));
    }

    // ── grep ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn grep_reports_file_line_and_text() {
        let tmp = fixture();
        let t = GrepTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "start"})).await;
        let text = out.text();
        assert!(text.contains("src/main.rs:1:"), "{text}");
        assert!(text.contains("README.md:1:start here"), "{text}");
    }

    #[tokio::test]
    async fn grep_include_filters_by_glob() {
        let tmp = fixture();
        let t = GrepTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "start", "include": "*.rs"})).await;
        let text = out.text();
        assert!(text.contains("src/main.rs"));
        assert!(!text.contains("README.md"));
    }

    #[tokio::test]
    async fn grep_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let lines: String = (0..50).map(|i| format!("match {i}\n")).collect();
        std::fs::write(tmp.path().join("big.txt"), lines).unwrap();
        let t = GrepTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "match", "limit": 5})).await;
        assert!(out.text().contains("limit of 5 matches reached"));
    }

    #[tokio::test]
    async fn grep_invalid_regex_is_error() {
        let tmp = fixture();
        let t = GrepTool::new(tmp.path());
        let out = run(&t, json!({"pattern": "("})).await;
        assert!(out.is_error);
    }
}
