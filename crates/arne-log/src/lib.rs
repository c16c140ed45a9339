// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable, append-only session journal with branch operations.
//!
//! One JSONL file per session: a header record, then entry records forming a
//! tree keyed by `parentId`.  Appends are fsynced; navigation and forking
//! never rewrite history.

mod entry;
mod list;
mod session;

pub use entry::{Entry, EntryPayload, Record, SessionHeader, TransformOp, HEADER_VERSION};
pub use list::{delete, list, list_all, rename, SessionSummary};
pub use session::{SessionLog, TreeNode};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the session journal.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file {0} is missing its header record")]
    MissingHeader(PathBuf),
    #[error("corrupt record at line {line}: {message}")]
    Corrupt { line: usize, message: String },
    #[error("record at line {line} references unseen parent {parent}")]
    ForwardParent { line: usize, parent: String },
    #[error("duplicate entry id {0}")]
    DuplicateId(String),
    #[error("unknown entry id: {0}")]
    UnknownEntry(String),
}
