// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Compaction: when the rendered context approaches the model's window,
//! summarize the old prefix and record a boundary entry.  Nothing is
//! deleted from the log; only the reconstructed context shrinks.

use arne_log::Entry;
use arne_model::{Message, Usage};

/// Tokens held back from the context window so the next response and the
/// request overhead always fit.
pub const DEFAULT_RESERVE_TOKENS: u64 = 16_384;

/// Instruction for the dedicated summarization call.
const SUMMARIZE_PROMPT: &str = "\
You are compacting an agent conversation to free context space. Summarize \
the conversation so far in a concise, information-dense way. Preserve all \
technical details that future work may need: file paths, function and test \
names, command outputs, error messages, decisions and their reasons, and \
unfinished items. The summary will replace this history.";

/// Should a compaction run, given the last assistant usage and the tokens
/// added to the branch since?
pub fn should_compact(
    last_usage: Option<&Usage>,
    added_tokens: u64,
    context_window: u64,
    reserve_tokens: u64,
) -> bool {
    let Some(usage) = last_usage else { return false };
    usage.total_tokens + added_tokens >= context_window.saturating_sub(reserve_tokens)
}

/// Pick the compaction cut point for a branch.
///
/// Policy: keep the most recent complete user→assistant exchange — the cut
/// lands on the last user message that has an assistant reply after it.
/// The cut then moves earlier past tool results so a tool-call group is
/// never split from the assistant message that produced it.  Returns the
/// id of the first kept entry, or `None` when the branch is too short to
/// compact anything.
pub fn choose_first_kept(branch: &[Entry]) -> Option<String> {
    let last_assistant = branch
        .iter()
        .rposition(|e| matches!(e.message(), Some(Message::Assistant(_))))?;
    let mut cut = branch[..last_assistant]
        .iter()
        .rposition(|e| matches!(e.message(), Some(Message::User(_))))?;

    while cut > 0 && matches!(branch[cut - 1].message(), Some(Message::ToolResult(_))) {
        // A tool result directly above the cut belongs to an assistant
        // message further up; move the cut to include the whole group.
        let group_owner = branch[..cut]
            .iter()
            .rposition(|e| matches!(e.message(), Some(Message::Assistant(_))));
        match group_owner {
            Some(owner) => cut = owner,
            None => break,
        }
    }

    // When the walk above landed on an assistant message, include its user
    // prompt too so the kept context starts on a user turn.
    if matches!(branch[cut].message(), Some(Message::Assistant(_))) {
        if let Some(u) = branch[..cut]
            .iter()
            .rposition(|e| matches!(e.message(), Some(Message::User(_))))
        {
            cut = u;
        }
    }

    // Nothing would be summarized: the cut is already the branch start.
    if cut == 0 {
        return None;
    }
    Some(branch[cut].id.clone())
}

/// The messages to summarize: every message entry strictly before the cut.
pub fn messages_to_summarize(branch: &[Entry], first_kept_id: &str) -> Vec<Message> {
    let cut = branch.iter().position(|e| e.id == first_kept_id).unwrap_or(0);
    branch[..cut].iter().filter_map(|e| e.message().cloned()).collect()
}

/// Build the single-turn summarization request body: the old conversation
/// rendered as text, under the compaction instruction.
pub fn summarize_request_text(to_summarize: &[Message], custom_instructions: Option<&str>) -> String {
    let mut prompt = String::from(SUMMARIZE_PROMPT);
    if let Some(extra) = custom_instructions {
        prompt.push_str("\n\nAdditional instructions: ");
        prompt.push_str(extra);
    }
    prompt.push_str("\n\n---\n\n");
    prompt.push_str(&render_history(to_summarize));
    prompt
}

fn render_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m {
            Message::User(u) => format!("User: {}", u.content.as_text().unwrap_or("[rich content]")),
            Message::Assistant(a) => {
                let mut text = format!("Assistant: {}", a.text());
                for (id, name, args) in a.tool_calls() {
                    text.push_str(&format!("\n[tool call {name} ({id}): {args}]"));
                }
                text
            }
            Message::ToolResult(r) => format!("Tool result ({}): {}", r.tool_call_id, r.text()),
            Message::BashExecution(b) => format!("User ran: $ {}\n{}", b.command, b.output),
            Message::BranchSummary(s) => format!("Branch summary: {}", s.summary),
            Message::CompactionSummary(s) => format!("Earlier summary: {}", s.summary),
            Message::Custom(_) => String::new(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arne_log::{EntryPayload, SessionLog};
    use arne_model::{AssistantMessage, ContentBlock, StopReason, UsageCost};

    fn usage(total: u64) -> Usage {
        Usage { total_tokens: total, cost: UsageCost::default(), ..Default::default() }
    }

    // ── Trigger ───────────────────────────────────────────────────────────────

    #[test]
    fn no_usage_never_triggers() {
        assert!(!should_compact(None, 10_000, 100_000, 16_384));
    }

    #[test]
    fn triggers_at_window_minus_reserve() {
        let u = usage(90_000);
        assert!(!should_compact(Some(&u), 0, 110_000, 16_384));
        assert!(should_compact(Some(&u), 4_000, 110_000, 16_384));
        assert!(should_compact(Some(&u), 0, 100_000, 16_384));
    }

    // ── Cut point ─────────────────────────────────────────────────────────────

    fn push_user(log: &mut SessionLog, text: &str) -> String {
        log.append(EntryPayload::Message { message: Message::user(text) }).unwrap()
    }

    fn push_assistant(log: &mut SessionLog, text: &str, tool_call: Option<(&str, &str)>) -> String {
        let mut a = AssistantMessage::started("mock", "m", "api");
        a.content.push(ContentBlock::text(text));
        if let Some((id, name)) = tool_call {
            a.content.push(ContentBlock::tool_call(id, name, serde_json::json!({})));
            a.stop_reason = StopReason::ToolUse;
        }
        log.append(EntryPayload::Message { message: Message::Assistant(a) }).unwrap()
    }

    fn push_tool_result(log: &mut SessionLog, id: &str) -> String {
        log.append(EntryPayload::Message {
            message: Message::tool_result(id, "bash", "out", false),
        })
        .unwrap()
    }

    #[test]
    fn keeps_most_recent_complete_exchange() {
        let mut log = SessionLog::in_memory("/w");
        push_user(&mut log, "old q");
        push_assistant(&mut log, "old a", None);
        let kept = push_user(&mut log, "new q");
        push_assistant(&mut log, "new a", None);

        assert_eq!(choose_first_kept(&log.branch()).as_deref(), Some(kept.as_str()));
    }

    #[test]
    fn single_exchange_cannot_compact() {
        let mut log = SessionLog::in_memory("/w");
        push_user(&mut log, "only q");
        push_assistant(&mut log, "only a", None);
        assert_eq!(choose_first_kept(&log.branch()), None);
    }

    #[test]
    fn no_assistant_yet_cannot_compact() {
        let mut log = SessionLog::in_memory("/w");
        push_user(&mut log, "q");
        assert_eq!(choose_first_kept(&log.branch()), None);
    }

    #[test]
    fn cut_never_splits_a_tool_group() {
        let mut log = SessionLog::in_memory("/w");
        push_user(&mut log, "old q");
        push_assistant(&mut log, "old a", None);
        push_user(&mut log, "do work");
        let owner = push_assistant(&mut log, "", Some(("t1", "bash")));
        push_tool_result(&mut log, "t1");
        push_user(&mut log, "follow-up inside turn");
        push_assistant(&mut log, "done", None);

        // The naive cut ("follow-up inside turn") sits right after a tool
        // result; the policy must not land there... it walks back to the
        // assistant that owns the group.
        let branch = log.branch();
        let kept = choose_first_kept(&branch).unwrap();
        let kept_pos = branch.iter().position(|e| e.id == kept).unwrap();
        let owner_pos = branch.iter().position(|e| e.id == owner).unwrap();
        assert!(kept_pos <= owner_pos + 1, "cut must not orphan the tool result");
        // The tool result stays with its assistant in the kept suffix.
        let kept_suffix = &branch[kept_pos..];
        let has_result = kept_suffix.iter().any(|e| matches!(e.message(), Some(Message::ToolResult(_))));
        let has_owner = kept_suffix.iter().any(|e| e.id == owner);
        assert_eq!(has_result, has_owner);
    }

    // ── Summarization request ─────────────────────────────────────────────────

    #[test]
    fn messages_to_summarize_is_strict_prefix() {
        let mut log = SessionLog::in_memory("/w");
        push_user(&mut log, "old q");
        push_assistant(&mut log, "old a", None);
        let kept = push_user(&mut log, "new q");
        push_assistant(&mut log, "new a", None);

        let to_sum = messages_to_summarize(&log.branch(), &kept);
        assert_eq!(to_sum.len(), 2);
        assert_eq!(to_sum[0].as_text(), Some("old q"));
    }

    #[test]
    fn summarize_request_includes_history_and_custom_instructions() {
        let msgs = vec![Message::user("what is in src/main.rs")];
        let text = summarize_request_text(&msgs, Some("focus on file names"));
        assert!(text.contains("what is in src/main.rs"));
        assert!(text.contains("focus on file names"));
        assert!(text.contains("compacting"));
    }

    #[test]
    fn render_history_includes_tool_calls_and_results() {
        let mut a = AssistantMessage::started("p", "m", "api");
        a.content.push(ContentBlock::tool_call("t1", "bash", serde_json::json!({"command": "ls"})));
        let msgs = vec![
            Message::Assistant(a),
            Message::tool_result("t1", "bash", "a\nb", false),
        ];
        let text = render_history(&msgs);
        assert!(text.contains("tool call bash"));
        assert!(text.contains("Tool result (t1)"));
    }
}
