// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;

use arne_log::{EntryPayload, SessionLog};
use arne_model::{Message, Usage, UsageCost};

/// Human-readable statement of the compaction cut-point policy, surfaced in
/// stats so the behavior is observable without reading code.
pub const COMPACTION_POLICY: &str =
    "keep the most recent complete user-assistant exchange; never split a tool-call group";

/// Aggregated statistics for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub name: Option<String>,
    pub entry_count: usize,
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_results: usize,
    pub compaction_count: usize,
    /// Sum of usage over all assistant messages on the current branch.
    pub total_usage: Usage,
    pub compaction_policy: &'static str,
}

/// Compute stats over the current branch of `log`.
pub fn session_stats(log: &SessionLog) -> SessionStats {
    let branch = log.branch();
    let mut stats = SessionStats {
        session_id: log.session_id().to_string(),
        name: log.name().map(str::to_string),
        entry_count: branch.len(),
        message_count: 0,
        user_messages: 0,
        assistant_messages: 0,
        tool_results: 0,
        compaction_count: 0,
        total_usage: Usage::default(),
        compaction_policy: COMPACTION_POLICY,
    };
    for entry in &branch {
        match &entry.payload {
            EntryPayload::Message { message } => {
                stats.message_count += 1;
                match message {
                    Message::User(_) => stats.user_messages += 1,
                    Message::Assistant(a) => {
                        stats.assistant_messages += 1;
                        add_usage(&mut stats.total_usage, &a.usage);
                    }
                    Message::ToolResult(_) => stats.tool_results += 1,
                    _ => {}
                }
            }
            EntryPayload::Compaction { .. } => stats.compaction_count += 1,
            _ => {}
        }
    }
    stats
}

fn add_usage(total: &mut Usage, u: &Usage) {
    total.input += u.input;
    total.output += u.output;
    total.cache_read += u.cache_read;
    total.cache_write += u.cache_write;
    total.total_tokens += u.total_tokens;
    total.cost = UsageCost {
        input: total.cost.input + u.cost.input,
        output: total.cost.output + u.cost.output,
        cache_read: total.cost.cache_read + u.cost.cache_read,
        cache_write: total.cost.cache_write + u.cost.cache_write,
        total: total.cost.total + u.cost.total,
    };
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
