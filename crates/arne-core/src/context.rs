// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context reconstruction: from a branch of the session log to the
//! `{ system prompt, messages, tools }` envelope the model sees.

use serde_json::Value;
use tracing::warn;

use arne_log::{Entry, EntryPayload, TransformOp};
use arne_model::{
    CompactionSummaryMessage, Message, ToolSchema,
};

/// What one model call receives.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

impl Envelope {
    /// Rough token estimate for the whole request (4-chars-per-token, the
    /// same heuristic the messages use).
    pub fn estimated_tokens(&self) -> u64 {
        let msg: u64 = self.messages.iter().map(|m| m.approx_tokens()).sum();
        let system = (self.system_prompt.len() / 4) as u64;
        let tools: u64 = self
            .tools
            .iter()
            .map(|t| ((t.name.len() + t.description.len() + t.parameters.to_string().len()) / 4) as u64)
            .sum();
        msg + system + tools
    }
}

/// Compose the envelope for the given branch.
///
/// Honors the most recent compaction boundary: everything before
/// `first_kept_entry_id` is replaced by a synthesized summary exchange.
/// Context-transform patches recorded after the boundary are applied in
/// log order.
pub fn build_envelope(branch: &[Entry], system_prompt: &str, tools: Vec<ToolSchema>) -> Envelope {
    let mut messages = Vec::new();

    // Most recent compaction entry wins.
    let boundary = branch
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, e)| match &e.payload {
            EntryPayload::Compaction { summary, first_kept_entry_id, .. } => {
                Some((i, summary.clone(), first_kept_entry_id.clone()))
            }
            _ => None,
        });

    let start = match &boundary {
        Some((compaction_idx, summary, first_kept)) => {
            messages.push(Message::CompactionSummary(CompactionSummaryMessage {
                summary: format!(
                    "The earlier part of this conversation was summarized to stay within \
                     the context window:\n\n{summary}"
                ),
                timestamp: branch[*compaction_idx].timestamp.timestamp_millis(),
            }));
            messages.push(Message::assistant_text(
                "Understood. I have the summary and will continue from there.",
            ));
            branch.iter().position(|e| &e.id == first_kept).unwrap_or_else(|| {
                warn!(first_kept = %first_kept, "compaction boundary references an entry not on this branch");
                *compaction_idx + 1
            })
        }
        None => branch
            .iter()
            .position(|e| matches!(e.message(), Some(Message::User(_))))
            .unwrap_or(branch.len()),
    };

    for (i, entry) in branch.iter().enumerate().skip(start) {
        // The compaction entry itself is represented by the synthesized
        // summary above; entries before it are only included from the kept
        // suffix onward.
        if let Some((compaction_idx, ..)) = &boundary {
            if i == *compaction_idx {
                continue;
            }
        }
        let Some(message) = entry.message() else { continue };
        match message {
            // Direct shell executions are folded into the context as
            // rendered text, so the model sees what the user ran.
            Message::BashExecution(b) => {
                let exit = b.exit_code.filter(|c| *c != 0).map(|c| format!("\n[exit {c}]")).unwrap_or_default();
                messages.push(Message::user(format!(
                    "I ran this command:\n$ {}\n{}{exit}",
                    b.command, b.output
                )));
            }
            other => messages.push(other.clone()),
        }
    }

    // Apply persisted context patches newer than the boundary.
    let patch_start = boundary.as_ref().map(|(i, ..)| *i + 1).unwrap_or(0);
    for entry in branch.iter().skip(patch_start) {
        if let EntryPayload::ContextTransform { ops } = &entry.payload {
            apply_transform_ops(&mut messages, ops);
        }
    }

    Envelope { system_prompt: system_prompt.to_string(), messages, tools }
}

/// Apply raw transform ops to the message list.  Unknown op kinds are
/// skipped with a warning so newer writers do not break older readers.
pub fn apply_transform_ops(messages: &mut Vec<Message>, ops: &[Value]) {
    for raw in ops {
        match serde_json::from_value::<TransformOp>(raw.clone()) {
            Ok(TransformOp::MessagesCachedReplace { messages: replacement, reason }) => {
                warn!(reason = %reason, "replacing cached message prefix");
                *messages = replacement;
            }
            Err(_) => {
                let kind = raw.get("op").and_then(Value::as_str).unwrap_or("<missing>");
                warn!(op = kind, "skipping unknown context transform op");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
