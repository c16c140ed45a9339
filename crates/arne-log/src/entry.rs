// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use arne_model::{Message, ThinkingLevel};

/// First record of every session file, written as
/// `{"type":"header","version":1,...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "header", rename_all = "camelCase")]
pub struct SessionHeader {
    pub version: u32,
    pub session_id: String,
    pub cwd: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_path: Option<String>,
}

pub const HEADER_VERSION: u32 = 1;

/// One record appended to the session journal.
///
/// Entries form a tree keyed by `parent_id`: appends extend the current
/// leaf, navigation re-points the leaf, and nothing is ever rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

/// Typed payload of an [`Entry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    /// A conversational message (any role).
    Message { message: Message },
    /// A compaction checkpoint.  Context reconstruction starts from the
    /// synthesized summary plus everything from `first_kept_entry_id`
    /// forward; earlier entries stay on disk for replay and navigation.
    Compaction {
        summary: String,
        first_kept_entry_id: String,
        tokens_before: u64,
    },
    ModelChange {
        provider: String,
        model_id: String,
    },
    ThinkingLevelChange {
        level: ThinkingLevel,
    },
    /// Attaches (or, with `label: None`, clears) a human label on another
    /// entry.  Folded onto the target when the tree is rendered.
    Label {
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Updates the session's display name.
    SessionInfo { name: String },
    /// A persisted context patch produced before a model call.  Each op is
    /// kept as raw JSON; unknown op kinds are skipped with a warning when
    /// the context is rebuilt.
    ContextTransform { ops: Vec<Value> },
    /// Opaque extension data.
    Custom {
        custom_type: String,
        #[serde(default)]
        data: Value,
    },
}

impl Entry {
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            EntryPayload::Message { message } => Some(message),
            _ => None,
        }
    }

    /// True for payloads that never contribute to the model context
    /// (labels, renames, config changes).
    pub fn is_metadata(&self) -> bool {
        matches!(
            self.payload,
            EntryPayload::Label { .. }
                | EntryPayload::SessionInfo { .. }
                | EntryPayload::ModelChange { .. }
                | EntryPayload::ThinkingLevelChange { .. }
        )
    }
}

/// A context-transform operation, decoded from the raw op JSON on demand.
///
/// `messages_cached_replace` swaps the cached message prefix for a new one,
/// recording why the cache was invalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    MessagesCachedReplace {
        messages: Vec<Message>,
        reason: String,
    },
}

/// A record read back from disk: a typed entry, or a record whose `type` tag
/// this version does not know.  Unknown records stay in the tree (their ids
/// may be referenced by later entries) but contribute nothing to context.
#[derive(Debug, Clone)]
pub enum Record {
    Entry(Entry),
    Unknown { id: String, parent_id: Option<String>, raw: Value },
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Self::Entry(e) => &e.id,
            Self::Unknown { id, .. } => id,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Entry(e) => e.parent_id.as_deref(),
            Self::Unknown { parent_id, .. } => parent_id.as_deref(),
        }
    }

    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Self::Entry(e) => Some(e),
            Self::Unknown { .. } => None,
        }
    }

    /// Serialized journal line (without the trailing newline).  Unknown
    /// records are written back verbatim so forward-compatible data
    /// survives a fork replay.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        match self {
            Self::Entry(e) => serde_json::to_string(e),
            Self::Unknown { raw, .. } => serde_json::to_string(raw),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
