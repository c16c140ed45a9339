// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::entry::{Entry, EntryPayload, Record, SessionHeader, HEADER_VERSION};
use crate::LogError;

/// Append-only branching session journal.
///
/// One JSONL file per session: a header record followed by entry records.
/// All appends go through the single owner of this struct; every append is
/// flushed and fsynced before the new id is returned.
pub struct SessionLog {
    header: SessionHeader,
    path: Option<PathBuf>,
    file: Option<File>,
    records: Vec<Record>,
    index: HashMap<String, usize>,
    leaf: Option<String>,
    next_seq: u64,
}

/// One node of the rendered session tree.  Label entries are folded onto
/// their targets rather than appearing as nodes of their own.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub entry: Entry,
    pub label: Option<String>,
    pub children: Vec<TreeNode>,
}

impl SessionLog {
    /// Create a new persisted session under `dir`.
    pub fn create(cwd: impl Into<String>, dir: &Path) -> Result<Self, LogError> {
        Self::create_with_parent(cwd, dir, None)
    }

    fn create_with_parent(
        cwd: impl Into<String>,
        dir: &Path,
        parent_session_path: Option<String>,
    ) -> Result<Self, LogError> {
        std::fs::create_dir_all(dir)?;
        let header = SessionHeader {
            version: HEADER_VERSION,
            session_id: Uuid::new_v4().to_string(),
            cwd: cwd.into(),
            created_at: Utc::now(),
            parent_session_path,
        };
        let path = dir.join(format!("{}.jsonl", header.session_id));
        let mut file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        let line = serde_json::to_string(&header)
            .map_err(|e| LogError::Corrupt { line: 1, message: e.to_string() })?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(Self {
            header,
            path: Some(path),
            file: Some(file),
            records: Vec::new(),
            index: HashMap::new(),
            leaf: None,
            next_seq: 1,
        })
    }

    /// Ephemeral session: same invariants, no file.
    pub fn in_memory(cwd: impl Into<String>) -> Self {
        Self {
            header: SessionHeader {
                version: HEADER_VERSION,
                session_id: Uuid::new_v4().to_string(),
                cwd: cwd.into(),
                created_at: Utc::now(),
                parent_session_path: None,
            },
            path: None,
            file: None,
            records: Vec::new(),
            index: HashMap::new(),
            leaf: None,
            next_seq: 1,
        }
    }

    /// Open an existing session, replaying the file to rebuild indices.
    ///
    /// A partial trailing record (torn write) is truncated away and the leaf
    /// falls back to the last intact entry.  Corruption anywhere else is an
    /// error that names the offending line.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let content = std::fs::read_to_string(path)?;
        let mut lines = content.split_inclusive('\n');

        let header_line = lines.next().ok_or_else(|| LogError::MissingHeader(path.into()))?;
        if !header_line.ends_with('\n') {
            // A torn header means nothing was ever durably written.
            return Err(LogError::MissingHeader(path.into()));
        }
        let header: SessionHeader = serde_json::from_str(header_line)
            .map_err(|_| LogError::MissingHeader(path.into()))?;

        let mut log = Self {
            header,
            path: Some(path.into()),
            file: None,
            records: Vec::new(),
            index: HashMap::new(),
            leaf: None,
            next_seq: 1,
        };

        let mut good_bytes = header_line.len();
        let mut line_no = 1usize;
        let mut torn = false;
        for raw in lines {
            line_no += 1;
            let is_last = good_bytes + raw.len() == content.len();
            let complete = raw.ends_with('\n');
            let trimmed = raw.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                good_bytes += raw.len();
                continue;
            }
            match parse_record(trimmed) {
                Ok(record) => {
                    log.insert_replayed(record, line_no)?;
                    good_bytes += raw.len();
                }
                Err(e) if is_last && (!complete || e.is_syntax()) => {
                    // Torn write: drop the partial record and trim the file.
                    warn!(line = line_no, "truncating partial trailing record");
                    torn = true;
                    break;
                }
                Err(e) => {
                    return Err(LogError::Corrupt { line: line_no, message: e.to_string() });
                }
            }
        }
        if torn {
            let f = OpenOptions::new().write(true).open(path)?;
            f.set_len(good_bytes as u64)?;
            f.sync_data()?;
        }

        log.leaf = log.records.last().map(|r| r.id().to_string());
        log.file = Some(OpenOptions::new().append(true).open(path)?);
        Ok(log)
    }

    fn insert_replayed(&mut self, record: Record, line: usize) -> Result<(), LogError> {
        if self.index.contains_key(record.id()) {
            return Err(LogError::DuplicateId(record.id().to_string()));
        }
        if let Some(parent) = record.parent_id() {
            if !self.index.contains_key(parent) {
                return Err(LogError::ForwardParent { line, parent: parent.to_string() });
            }
        }
        if let Ok(seq) = u64::from_str_radix(record.id(), 16) {
            self.next_seq = self.next_seq.max(seq + 1);
        }
        self.index.insert(record.id().to_string(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn session_id(&self) -> &str {
        &self.header.session_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn leaf_id(&self) -> Option<&str> {
        self.leaf.as_deref()
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.index.get(id).and_then(|&i| self.records[i].entry())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The session display name: the most recent `session_info` entry, if any.
    pub fn name(&self) -> Option<&str> {
        self.records.iter().rev().find_map(|r| match r.entry().map(|e| &e.payload) {
            Some(EntryPayload::SessionInfo { name }) => Some(name.as_str()),
            _ => None,
        })
    }

    // ─── Appending ────────────────────────────────────────────────────────────

    /// Append a payload at the current leaf; returns the new entry's id.
    pub fn append(&mut self, payload: EntryPayload) -> Result<String, LogError> {
        let entry = Entry {
            id: format!("{:x}", self.next_seq),
            parent_id: self.leaf.clone(),
            timestamp: Utc::now(),
            payload,
        };
        let id = entry.id.clone();
        self.write_record(&Record::Entry(entry))?;
        self.next_seq += 1;
        self.leaf = Some(id.clone());
        Ok(id)
    }

    /// Append a record verbatim (fork replay): id, parent and timestamp are
    /// preserved.  The leaf moves to the replayed record.
    fn append_raw(&mut self, record: Record) -> Result<(), LogError> {
        if self.index.contains_key(record.id()) {
            return Err(LogError::DuplicateId(record.id().to_string()));
        }
        if let Ok(seq) = u64::from_str_radix(record.id(), 16) {
            self.next_seq = self.next_seq.max(seq + 1);
        }
        let id = record.id().to_string();
        self.write_record(&record)?;
        self.leaf = Some(id);
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> Result<(), LogError> {
        let line = record
            .to_json_line()
            .map_err(|e| LogError::Corrupt { line: self.records.len() + 2, message: e.to_string() })?;
        if let Some(file) = &mut self.file {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        self.index.insert(record.id().to_string(), self.records.len());
        self.records.push(record.clone());
        Ok(())
    }

    // ─── Branch and tree ──────────────────────────────────────────────────────

    /// The ordered chain from root to the current leaf, metadata entries
    /// included.  Records with an unknown type tag are skipped.
    pub fn branch(&self) -> Vec<Entry> {
        match &self.leaf {
            Some(leaf) => self.chain_to(leaf),
            None => Vec::new(),
        }
    }

    /// The ordered chain from root through `id` (inclusive).
    pub fn chain_to(&self, id: &str) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(cur) = cursor {
            let Some(&i) = self.index.get(&cur) else { break };
            cursor = self.records[i].parent_id().map(str::to_string);
            if let Some(entry) = self.records[i].entry() {
                out.push(entry.clone());
            }
        }
        out.reverse();
        out
    }

    /// The full DAG as a forest of [`TreeNode`]s.  Label entries do not
    /// appear as nodes; the latest label for each target is resolved onto
    /// the target node, and children of a label entry are re-linked to the
    /// label's parent so the chain stays connected.
    pub fn tree(&self) -> Vec<TreeNode> {
        let mut labels: HashMap<String, String> = HashMap::new();
        for r in &self.records {
            if let Some(Entry { payload: EntryPayload::Label { target_id, label }, .. }) = r.entry()
            {
                match label {
                    Some(l) => labels.insert(target_id.clone(), l.clone()),
                    None => labels.remove(target_id),
                };
            }
        }

        let mut children: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for (i, r) in self.records.iter().enumerate() {
            if is_label_record(r) {
                continue;
            }
            children.entry(self.effective_parent(r)).or_default().push(i);
        }

        let roots = children.get(&None).cloned().unwrap_or_default();
        roots.iter().map(|&i| self.build_node(i, &children, &labels)).collect()
    }

    fn build_node(
        &self,
        i: usize,
        children: &HashMap<Option<String>, Vec<usize>>,
        labels: &HashMap<String, String>,
    ) -> TreeNode {
        let record = &self.records[i];
        let entry = record.entry().cloned().unwrap_or_else(|| Entry {
            id: record.id().to_string(),
            parent_id: record.parent_id().map(str::to_string),
            timestamp: Utc::now(),
            payload: EntryPayload::Custom { custom_type: "unknown".into(), data: Value::Null },
        });
        let kids = children
            .get(&Some(record.id().to_string()))
            .map(|ids| ids.iter().map(|&j| self.build_node(j, children, labels)).collect())
            .unwrap_or_default();
        TreeNode {
            label: labels.get(record.id()).cloned(),
            entry,
            children: kids,
        }
    }

    /// Nearest ancestor that is not a label entry.
    fn effective_parent(&self, record: &Record) -> Option<String> {
        let mut parent = record.parent_id().map(str::to_string);
        while let Some(p) = &parent {
            let Some(&i) = self.index.get(p) else { break };
            if is_label_record(&self.records[i]) {
                parent = self.records[i].parent_id().map(str::to_string);
            } else {
                break;
            }
        }
        parent
    }

    // ─── Navigation and forking ───────────────────────────────────────────────

    /// Re-point the leaf; subsequent appends branch off `id`.
    pub fn set_leaf(&mut self, id: &str) -> Result<(), LogError> {
        if !self.index.contains_key(id) {
            return Err(LogError::UnknownEntry(id.to_string()));
        }
        self.leaf = Some(id.to_string());
        Ok(())
    }

    /// Detach the leaf entirely: the next append starts a new root.
    /// Used when forking the first message of a session.
    pub fn reset_leaf(&mut self) {
        self.leaf = None;
    }

    /// New session whose header records this one as parent and whose journal
    /// replays the chain from the root through `id`, ids preserved.
    pub fn fork_from(&self, id: &str, dir: &Path) -> Result<SessionLog, LogError> {
        if !self.index.contains_key(id) {
            return Err(LogError::UnknownEntry(id.to_string()));
        }
        let parent_path = self.path.as_ref().map(|p| p.to_string_lossy().to_string());
        let mut forked = Self::create_with_parent(self.header.cwd.clone(), dir, parent_path)?;

        // Raw chain root → id, including metadata and unknown records.
        let mut chain: Vec<&Record> = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(cur) = cursor {
            let Some(&i) = self.index.get(&cur) else { break };
            chain.push(&self.records[i]);
            cursor = self.records[i].parent_id().map(str::to_string);
        }
        for record in chain.into_iter().rev() {
            forked.append_raw(record.clone())?;
        }
        Ok(forked)
    }
}

fn is_label_record(r: &Record) -> bool {
    matches!(r.entry().map(|e| &e.payload), Some(EntryPayload::Label { .. }))
}

/// Parse one journal line into a typed or unknown record.
pub(crate) fn parse_record(line: &str) -> Result<Record, RecordParseError> {
    let value: Value = serde_json::from_str(line).map_err(RecordParseError::Syntax)?;
    match serde_json::from_value::<Entry>(value.clone()) {
        Ok(entry) => Ok(Record::Entry(entry)),
        Err(e) => {
            // Forward-compatibility: an unrecognized type tag is kept as an
            // opaque record instead of failing replay.
            let known_shape = value.get("id").and_then(Value::as_str).is_some();
            let unknown_type = value
                .get("type")
                .and_then(Value::as_str)
                .map(|t| !KNOWN_TYPES.contains(&t))
                .unwrap_or(false);
            if known_shape && unknown_type {
                Ok(Record::Unknown {
                    id: value["id"].as_str().unwrap_or_default().to_string(),
                    parent_id: value["parentId"].as_str().map(str::to_string),
                    raw: value,
                })
            } else {
                Err(RecordParseError::Shape(e))
            }
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "message",
    "compaction",
    "model_change",
    "thinking_level_change",
    "label",
    "session_info",
    "context_transform",
    "custom",
];

#[derive(Debug)]
pub(crate) enum RecordParseError {
    Syntax(serde_json::Error),
    Shape(serde_json::Error),
}

impl RecordParseError {
    /// True when the line is not even well-formed JSON — the signature of a
    /// torn write when it is the trailing record.
    fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }
}

impl std::fmt::Display for RecordParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "invalid JSON: {e}"),
            Self::Shape(e) => write!(f, "invalid record: {e}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
