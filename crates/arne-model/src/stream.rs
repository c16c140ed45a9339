// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Protocol-neutral streaming events and the in-progress message accumulator.
//!
//! Every provider adapter translates its wire format into the same
//! [`StreamEvent`] sequence: one `Start`, per-block start/delta/end triples,
//! any number of `MessageDelta` updates, and exactly one terminal
//! `Done` / `Error`.  Consumers fold the sequence into an
//! [`AssistantMessage`] with [`MessageAccumulator`].

use std::collections::HashMap;

use serde_json::Value;

use crate::partial_json::parse_partial;
use crate::types::{AssistantMessage, ContentBlock, StopReason, UsageDelta};

/// One event in a provider response stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream opened; carries the empty in-progress message with
    /// provider/model identity filled in.
    Start { message: AssistantMessage },
    TextStart { index: usize },
    TextDelta { index: usize, delta: String },
    TextEnd { index: usize, content: String },
    ThinkingStart { index: usize },
    ThinkingDelta { index: usize, delta: String },
    /// Opaque integrity blob for a thinking block.  May arrive before or
    /// after the block's end event; both orderings are accepted.
    SignatureDelta { index: usize, delta: String },
    ThinkingEnd { index: usize, content: String },
    ToolCallStart { index: usize, id: String, name: String },
    /// A raw JSON fragment of the tool-call arguments.
    ToolCallDelta { index: usize, delta: String },
    /// Final, strictly-parsed arguments for the block.
    ToolCallEnd { index: usize, arguments: Value },
    /// Incremental stop-reason / usage report.
    MessageDelta { stop_reason: Option<StopReason>, usage: Option<UsageDelta> },
    /// Terminal: the stream finished.
    Done { reason: StopReason },
    /// Terminal: the stream failed.
    Error { reason: StopReason, message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Folds a [`StreamEvent`] sequence into an [`AssistantMessage`].
///
/// The accumulator owns the canonical in-progress message; subscribers that
/// want progressive rendering read [`MessageAccumulator::message`] after each
/// applied event.  Per-block streaming state (partial argument buffers, the
/// stream-index → content-index mapping) is held here, not on the blocks.
#[derive(Debug)]
pub struct MessageAccumulator {
    message: AssistantMessage,
    /// Raw argument JSON accumulated per stream block index.
    partial_args: HashMap<usize, String>,
    /// Stream block index → position in `message.content`.
    block_index: HashMap<usize, usize>,
    finished: bool,
}

impl MessageAccumulator {
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            message,
            partial_args: HashMap::new(),
            block_index: HashMap::new(),
            finished: false,
        }
    }

    /// The in-progress (or, after a terminal event, final) message.
    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Tolerantly-parsed arguments for a still-streaming tool-call block.
    pub fn partial_arguments(&self, index: usize) -> Value {
        self.partial_args
            .get(&index)
            .map(|buf| parse_partial(buf))
            .unwrap_or(Value::Null)
    }

    /// Apply one event, mutating the in-progress message in place.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Start { message } => {
                self.message = message.clone();
            }
            StreamEvent::TextStart { index } => {
                self.open_block(*index, ContentBlock::Text { text: String::new() });
            }
            StreamEvent::TextDelta { index, delta } => {
                if let Some(ContentBlock::Text { text }) = self.block_mut(*index) {
                    text.push_str(delta);
                }
            }
            StreamEvent::TextEnd { index, content } => {
                if let Some(ContentBlock::Text { text }) = self.block_mut(*index) {
                    *text = content.clone();
                }
            }
            StreamEvent::ThinkingStart { index } => {
                self.open_block(
                    *index,
                    ContentBlock::Thinking { thinking: String::new(), signature: None },
                );
            }
            StreamEvent::ThinkingDelta { index, delta } => {
                if let Some(ContentBlock::Thinking { thinking, .. }) = self.block_mut(*index) {
                    thinking.push_str(delta);
                }
            }
            StreamEvent::SignatureDelta { index, delta } => {
                // Concatenate even when the block has already ended; some
                // providers deliver the signature after thinking_end.
                if let Some(ContentBlock::Thinking { signature, .. }) = self.block_mut(*index) {
                    signature.get_or_insert_with(String::new).push_str(delta);
                }
            }
            StreamEvent::ThinkingEnd { index, content } => {
                if let Some(ContentBlock::Thinking { thinking, .. }) = self.block_mut(*index) {
                    *thinking = content.clone();
                }
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                self.partial_args.insert(*index, String::new());
                self.open_block(
                    *index,
                    ContentBlock::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: Value::Null,
                    },
                );
            }
            StreamEvent::ToolCallDelta { index, delta } => {
                if let Some(buf) = self.partial_args.get_mut(index) {
                    buf.push_str(delta);
                    let parsed = parse_partial(buf);
                    if let Some(ContentBlock::ToolCall { arguments, .. }) = self.block_mut(*index)
                    {
                        *arguments = parsed;
                    }
                }
            }
            StreamEvent::ToolCallEnd { index, arguments } => {
                if let Some(ContentBlock::ToolCall { arguments: args, .. }) =
                    self.block_mut(*index)
                {
                    *args = arguments.clone();
                }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if let Some(sr) = stop_reason {
                    self.message.stop_reason = *sr;
                }
                if let Some(delta) = usage {
                    self.message.usage.merge(delta);
                }
            }
            StreamEvent::Done { reason } => {
                self.message.stop_reason = *reason;
                self.finished = true;
            }
            StreamEvent::Error { reason, message } => {
                self.message.stop_reason = *reason;
                self.message.error_message = Some(message.clone());
                self.finished = true;
            }
        }
    }

    /// Consume the accumulator, yielding the finalized message.
    pub fn finish(mut self) -> AssistantMessage {
        // Empty text blocks carry no information and some providers reject
        // them on resubmission.
        self.message.content.retain(|b| match b {
            ContentBlock::Text { text } => !text.is_empty(),
            _ => true,
        });
        self.message
    }

    fn open_block(&mut self, index: usize, block: ContentBlock) {
        let pos = self.message.content.len();
        self.message.content.push(block);
        self.block_index.insert(index, pos);
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut ContentBlock> {
        let pos = *self.block_index.get(&index)?;
        self.message.content.get_mut(pos)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;
    use serde_json::json;

    fn acc() -> MessageAccumulator {
        MessageAccumulator::new(AssistantMessage::started("anthropic", "claude", "messages"))
    }

    #[test]
    fn text_deltas_accumulate_in_order() {
        let mut a = acc();
        a.apply(&StreamEvent::TextStart { index: 0 });
        a.apply(&StreamEvent::TextDelta { index: 0, delta: "Hel".into() });
        a.apply(&StreamEvent::TextDelta { index: 0, delta: "lo".into() });
        assert_eq!(a.message().text(), "Hello");
    }

    #[test]
    fn text_end_replaces_with_final_content() {
        let mut a = acc();
        a.apply(&StreamEvent::TextStart { index: 0 });
        a.apply(&StreamEvent::TextDelta { index: 0, delta: "partial".into() });
        a.apply(&StreamEvent::TextEnd { index: 0, content: "final".into() });
        assert_eq!(a.message().text(), "final");
    }

    #[test]
    fn tool_call_deltas_parse_tolerantly_then_strictly() {
        let mut a = acc();
        a.apply(&StreamEvent::ToolCallStart { index: 1, id: "tc_1".into(), name: "read".into() });
        a.apply(&StreamEvent::ToolCallDelta { index: 1, delta: r#"{"path":"s"#.into() });
        assert_eq!(a.partial_arguments(1), json!({"path": "s"}));
        match &a.message().content[0] {
            ContentBlock::ToolCall { arguments, .. } => {
                assert_eq!(arguments, &json!({"path": "s"}));
            }
            other => panic!("wrong block: {other:?}"),
        }
        a.apply(&StreamEvent::ToolCallDelta { index: 1, delta: r#"rc/ma"#.into() });
        a.apply(&StreamEvent::ToolCallDelta { index: 1, delta: r#"in.rs"}"#.into() });
        a.apply(&StreamEvent::ToolCallEnd { index: 1, arguments: json!({"path": "src/main.rs"}) });
        match &a.message().content[0] {
            ContentBlock::ToolCall { arguments, .. } => {
                assert_eq!(arguments, &json!({"path": "src/main.rs"}));
            }
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn signature_after_thinking_end_is_concatenated() {
        let mut a = acc();
        a.apply(&StreamEvent::ThinkingStart { index: 0 });
        a.apply(&StreamEvent::ThinkingDelta { index: 0, delta: "because".into() });
        a.apply(&StreamEvent::ThinkingEnd { index: 0, content: "because".into() });
        a.apply(&StreamEvent::SignatureDelta { index: 0, delta: "sigA".into() });
        a.apply(&StreamEvent::SignatureDelta { index: 0, delta: "sigB".into() });
        match &a.message().content[0] {
            ContentBlock::Thinking { signature, .. } => {
                assert_eq!(signature.as_deref(), Some("sigAsigB"));
            }
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn cache_usage_from_start_survives_later_deltas() {
        let mut a = acc();
        a.apply(&StreamEvent::MessageDelta {
            stop_reason: None,
            usage: Some(UsageDelta {
                input: Some(200),
                cache_read: Some(150),
                cache_write: Some(10),
                ..Default::default()
            }),
        });
        a.apply(&StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::Stop),
            usage: Some(UsageDelta { output: Some(42), ..Default::default() }),
        });
        let u: &Usage = &a.message().usage;
        assert_eq!(u.cache_read, 150);
        assert_eq!(u.cache_write, 10);
        assert_eq!(u.output, 42);
    }

    #[test]
    fn interleaved_blocks_keep_declaration_order() {
        let mut a = acc();
        a.apply(&StreamEvent::TextStart { index: 0 });
        a.apply(&StreamEvent::ToolCallStart { index: 1, id: "t1".into(), name: "a".into() });
        a.apply(&StreamEvent::ToolCallStart { index: 2, id: "t2".into(), name: "b".into() });
        a.apply(&StreamEvent::TextDelta { index: 0, delta: "x".into() });
        let calls = a.message().tool_calls();
        assert_eq!(calls[0].0, "t1");
        assert_eq!(calls[1].0, "t2");
        assert_eq!(a.message().text(), "x");
    }

    #[test]
    fn finish_drops_empty_text_blocks() {
        let mut a = acc();
        a.apply(&StreamEvent::TextStart { index: 0 });
        a.apply(&StreamEvent::ToolCallStart { index: 1, id: "t1".into(), name: "a".into() });
        a.apply(&StreamEvent::Done { reason: StopReason::ToolUse });
        let m = a.finish();
        assert_eq!(m.content.len(), 1);
        assert!(matches!(m.content[0], ContentBlock::ToolCall { .. }));
    }

    #[test]
    fn error_event_sets_reason_and_message() {
        let mut a = acc();
        a.apply(&StreamEvent::Error {
            reason: StopReason::Error,
            message: "boom".into(),
        });
        assert!(a.is_finished());
        assert_eq!(a.message().stop_reason, StopReason::Error);
        assert_eq!(a.message().error_message.as_deref(), Some("boom"));
    }
}
