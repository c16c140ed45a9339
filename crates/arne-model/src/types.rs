// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Millisecond-precision UTC timestamp used on every message.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Content blocks ───────────────────────────────────────────────────────────

/// One block of assistant output.
///
/// Assistant messages are an ordered list of heterogeneous blocks.  During
/// streaming the blocks are grown in place by the [`crate::MessageAccumulator`];
/// streaming-only state (partial JSON buffers, source indices) lives in the
/// accumulator, never on the block itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Hidden-chain reasoning.  The signature is an opaque provider blob that
    /// must be preserved to resubmit the block; without it the block is
    /// demoted to plain text before the next request (see [`crate::sanitize`]).
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall { id: id.into(), name: name.into(), arguments }
    }
}

/// A single content part in a user message (text or image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Data URL (`data:<mime>;base64,<b64>`).
        image_url: String,
    },
}

/// A single content part in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContentPart {
    Text { text: String },
    Image { image_url: String },
}

// ─── Usage accounting ─────────────────────────────────────────────────────────

/// Token usage for one assistant message.  Populated from provider usage
/// reports; cost is derived from the model catalog at finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: UsageCost,
}

/// Dollar cost breakdown for one assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

/// Partial usage report from a single stream event.
///
/// Providers report usage incrementally: input and cache token counts arrive
/// with the stream's opening event, output counts with the closing delta.
/// `None` means "not reported by this event" — a later delta that omits a
/// field must never clobber an earlier value, which is why these are options
/// rather than zeroes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageDelta {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Merge a partial report: present fields override, absent fields keep
    /// their previous value.  The total is recomputed when not reported.
    pub fn merge(&mut self, delta: &UsageDelta) {
        if let Some(v) = delta.input {
            self.input = v;
        }
        if let Some(v) = delta.output {
            self.output = v;
        }
        if let Some(v) = delta.cache_read {
            self.cache_read = v;
        }
        if let Some(v) = delta.cache_write {
            self.cache_write = v;
        }
        self.total_tokens = delta
            .total_tokens
            .unwrap_or(self.input + self.output + self.cache_read + self.cache_write);
    }
}

// ─── Stop reason ──────────────────────────────────────────────────────────────

/// Terminal classification of an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// The model finished its response normally.
    Stop,
    /// The model requested one or more tool calls.
    ToolUse,
    /// The output-token limit was reached mid-response.
    Length,
    /// The user aborted the turn.
    Aborted,
    /// The provider reported an error; see `error_message`.
    Error,
}

/// Requested depth of model reasoning, mapped by each provider onto its own
/// thinking-budget knob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    /// Token budget forwarded to providers that support extended thinking.
    pub fn budget_tokens(&self) -> Option<u32> {
        match self {
            Self::Off => None,
            Self::Low => Some(2_048),
            Self::Medium => Some(8_192),
            Self::High => Some(32_768),
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// A user message: plain text or mixed text + image parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub content: UserContent,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Parts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A complete assistant message, finalized at stream end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub provider: String,
    pub model: String,
    /// Wire API flavor that produced this message (e.g. `"messages"`).
    pub api: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl AssistantMessage {
    /// Empty in-progress message, created when a stream opens.
    pub fn started(provider: impl Into<String>, model: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            provider: provider.into(),
            model: model.into(),
            api: api.into(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: now_millis(),
        }
    }

    /// All tool-call blocks in declaration order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall { id, name, arguments } => {
                    Some((id.as_str(), name.as_str(), arguments))
                }
                _ => None,
            })
            .collect()
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// The result of one tool call, attached to the conversation so the model can
/// observe what its tool did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ToolContentPart>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: i64,
}

impl ToolResultMessage {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ToolContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A shell command the user ran directly (outside the model loop), folded
/// into context as rendered text so the model sees what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashExecutionMessage {
    pub command: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timestamp: i64,
}

/// Summary of a branch the user navigated away from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummaryMessage {
    pub summary: String,
    pub timestamp: i64,
}

/// Summary text produced by a compaction run, kept as a message so branch
/// replay renders it like any other turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionSummaryMessage {
    pub summary: String,
    pub timestamp: i64,
}

/// Opaque extension-owned message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMessage {
    pub custom_type: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: i64,
}

/// A single message in the conversation, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
    BashExecution(BashExecutionMessage),
    BranchSummary(BranchSummaryMessage),
    CompactionSummary(CompactionSummaryMessage),
    Custom(CustomMessage),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage { content: UserContent::Text(text.into()), timestamp: now_millis() })
    }

    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self::User(UserMessage { content: UserContent::Parts(parts), timestamp: now_millis() })
    }

    /// Plain-text assistant message; used for synthesized acknowledgments and
    /// in tests.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        let mut m = AssistantMessage::started("synthetic", "synthetic", "none");
        m.content.push(ContentBlock::text(text));
        Self::Assistant(m)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult(ToolResultMessage {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ToolContentPart::Text { text: text.into() }],
            is_error,
            details: None,
            timestamp: now_millis(),
        })
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::User(m) => m.timestamp,
            Self::Assistant(m) => m.timestamp,
            Self::ToolResult(m) => m.timestamp,
            Self::BashExecution(m) => m.timestamp,
            Self::BranchSummary(m) => m.timestamp,
            Self::CompactionSummary(m) => m.timestamp,
            Self::Custom(m) => m.timestamp,
        }
    }

    /// Plain text of this message, when it has a single-text representation.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::User(m) => m.content.as_text(),
            Self::BranchSummary(m) => Some(&m.summary),
            Self::CompactionSummary(m) => Some(&m.summary),
            _ => None,
        }
    }

    /// Approximate token count using the 4-chars-per-token heuristic.
    /// Images use a fixed 765-token estimate.
    pub fn approx_tokens(&self) -> u64 {
        let chars: usize = match self {
            Self::User(m) => match &m.content {
                UserContent::Text(t) => t.len(),
                UserContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => text.len(),
                        ContentPart::Image { .. } => 765 * 4,
                    })
                    .sum(),
            },
            Self::Assistant(m) => m
                .content
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.len(),
                    ContentBlock::Thinking { thinking, .. } => thinking.len(),
                    ContentBlock::ToolCall { name, arguments, .. } => {
                        name.len() + arguments.to_string().len()
                    }
                })
                .sum(),
            Self::ToolResult(m) => m
                .content
                .iter()
                .map(|p| match p {
                    ToolContentPart::Text { text } => text.len(),
                    ToolContentPart::Image { .. } => 765 * 4,
                })
                .sum(),
            Self::BashExecution(m) => m.command.len() + m.output.len(),
            Self::BranchSummary(m) => m.summary.len(),
            Self::CompactionSummary(m) => m.summary.len(),
            Self::Custom(m) => m.data.to_string().len(),
        };
        ((chars / 4).max(1)) as u64
    }
}

// ─── Requests ─────────────────────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Per-request options carried alongside the message list.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Token budget for extended thinking; `None` disables thinking.
    pub thinking_budget: Option<u32>,
    /// Extra headers forwarded verbatim to the provider.
    pub headers: Option<HashMap<String, String>>,
    /// Upper bound for a single retry backoff sleep.
    pub max_retry_delay_ms: Option<u64>,
    /// Cancels the in-flight attempt and all pending retries.
    pub abort: CancellationToken,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub tools: Vec<ToolSchema>,
    pub options: CompletionOptions,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_round_trips() {
        let m = Message::user("hello");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"user\""), "{json}");
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_text(), Some("hello"));
    }

    #[test]
    fn assistant_message_round_trips_with_blocks() {
        let mut m = AssistantMessage::started("anthropic", "claude", "messages");
        m.content.push(ContentBlock::text("hi"));
        m.content.push(ContentBlock::tool_call(
            "tc_1",
            "bash",
            serde_json::json!({"command": "ls"}),
        ));
        m.stop_reason = StopReason::ToolUse;
        let json = serde_json::to_string(&Message::Assistant(m)).unwrap();
        assert!(json.contains("\"stopReason\":\"toolUse\""), "{json}");
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Assistant(a) => {
                assert_eq!(a.tool_calls().len(), 1);
                assert_eq!(a.text(), "hi");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn tool_result_round_trips() {
        let m = Message::tool_result("tc_1", "bash", "a\nb\n", false);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"toolResult\""), "{json}");
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::ToolResult(r) => {
                assert_eq!(r.tool_call_id, "tc_1");
                assert_eq!(r.text(), "a\nb\n");
                assert!(!r.is_error);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_payload_fields_are_skipped() {
        // Forward-compatibility: a reader must tolerate fields it does not know.
        let json = r#"{"role":"user","content":"hi","timestamp":1,"futureField":true}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.as_text(), Some("hi"));
    }

    #[test]
    fn usage_merge_overrides_only_present_fields() {
        let mut u = Usage::default();
        u.merge(&UsageDelta {
            input: Some(100),
            cache_read: Some(40),
            cache_write: Some(8),
            ..Default::default()
        });
        // A later delta that omits cache counts must not clobber them.
        u.merge(&UsageDelta { output: Some(25), ..Default::default() });
        assert_eq!(u.input, 100);
        assert_eq!(u.output, 25);
        assert_eq!(u.cache_read, 40);
        assert_eq!(u.cache_write, 8);
        assert_eq!(u.total_tokens, 100 + 25 + 40 + 8);
    }

    #[test]
    fn usage_merge_respects_reported_total() {
        let mut u = Usage::default();
        u.merge(&UsageDelta {
            input: Some(10),
            output: Some(5),
            total_tokens: Some(99),
            ..Default::default()
        });
        assert_eq!(u.total_tokens, 99);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn thinking_block_serializes_signature_only_when_present() {
        let b = ContentBlock::Thinking { thinking: "t".into(), signature: None };
        let json = serde_json::to_string(&b).unwrap();
        assert!(!json.contains("signature"), "{json}");
        let b = ContentBlock::Thinking { thinking: "t".into(), signature: Some("sig".into()) };
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"signature\":\"sig\""), "{json}");
    }

    #[test]
    fn stop_reason_uses_camel_case_wire_names() {
        assert_eq!(serde_json::to_string(&StopReason::ToolUse).unwrap(), "\"toolUse\"");
        assert_eq!(serde_json::to_string(&StopReason::Aborted).unwrap(), "\"aborted\"");
    }
}
