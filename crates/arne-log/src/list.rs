// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session discovery: enumerate persisted session files with the summary
//! metadata a session picker needs, without loading full logs into memory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use arne_model::Message;

use crate::entry::EntryPayload;
use crate::session::{parse_record, SessionLog};
use crate::LogError;

/// Summary of one persisted session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub path: PathBuf,
    pub cwd: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub message_count: usize,
    /// First user message, trimmed to a display-sized preview.
    pub first_user_message: Option<String>,
    /// Concatenated message text for client-side search, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
}

const PREVIEW_CHARS: usize = 100;

/// Enumerate sessions under `dir` whose header cwd equals `cwd`.
pub fn list(dir: &Path, cwd: &str, include_search_text: bool) -> Result<Vec<SessionSummary>, LogError> {
    let mut out = list_all(dir, include_search_text)?;
    out.retain(|s| s.cwd == cwd);
    Ok(out)
}

/// Enumerate every session under `dir`, newest first.
pub fn list_all(dir: &Path, include_search_text: bool) -> Result<Vec<SessionSummary>, LogError> {
    let mut out = Vec::new();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for dirent in read_dir {
        let path = dirent?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        match summarize(&path, include_search_text) {
            Ok(summary) => out.push(summary),
            // A broken file must not hide the healthy sessions next to it.
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session"),
        }
    }
    out.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(out)
}

/// Delete a persisted session file.
pub fn delete(path: &Path) -> Result<(), LogError> {
    std::fs::remove_file(path)?;
    Ok(())
}

/// Rename a session by appending a `session_info` entry to its journal.
pub fn rename(path: &Path, name: &str) -> Result<(), LogError> {
    let mut log = SessionLog::open(path)?;
    log.append(EntryPayload::SessionInfo { name: name.to_string() })?;
    Ok(())
}

fn summarize(path: &Path, include_search_text: bool) -> Result<SessionSummary, LogError> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();
    let header: crate::entry::SessionHeader = lines
        .next()
        .and_then(|l| serde_json::from_str(l).ok())
        .ok_or_else(|| LogError::MissingHeader(path.into()))?;

    let mut message_count = 0usize;
    let mut name = None;
    let mut first_user_message = None;
    let mut search_text = include_search_text.then(String::new);

    for line in lines {
        let Ok(record) = parse_record(line) else { continue };
        let Some(entry) = record.entry() else { continue };
        match &entry.payload {
            EntryPayload::Message { message } => {
                message_count += 1;
                let text = message_text(message);
                if first_user_message.is_none() {
                    if let Message::User(_) = message {
                        first_user_message = Some(preview(&text));
                    }
                }
                if let Some(st) = &mut search_text {
                    if !text.is_empty() {
                        st.push_str(&text);
                        st.push('\n');
                    }
                }
            }
            EntryPayload::SessionInfo { name: n } => name = Some(n.clone()),
            _ => {}
        }
    }

    let modified_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or(header.created_at);

    Ok(SessionSummary {
        session_id: header.session_id,
        path: path.into(),
        cwd: header.cwd,
        name,
        created_at: header.created_at,
        modified_at,
        message_count,
        first_user_message,
        search_text,
    })
}

fn message_text(message: &Message) -> String {
    match message {
        Message::User(u) => u.content.as_text().unwrap_or_default().to_string(),
        Message::Assistant(a) => a.text(),
        Message::ToolResult(r) => r.text(),
        Message::BashExecution(b) => format!("{}\n{}", b.command, b.output),
        Message::BranchSummary(s) => s.summary.clone(),
        Message::CompactionSummary(s) => s.summary.clone(),
        Message::Custom(_) => String::new(),
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .nth(PREVIEW_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
