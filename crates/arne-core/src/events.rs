// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use serde_json::Value;

use arne_model::{Message, StreamEvent, ToolResultMessage};

use crate::queue::{QueueKind, QueuedUserMessage};

/// State of the turn scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    Idle,
    PreparingRequest,
    Streaming,
    ExecutingTools,
    Compacting,
    Aborted,
    Errored,
}

/// Every observable state change, fanned out to subscribers.
///
/// Events are plain values: message payloads are cloned at the event
/// boundary, so subscribers never share mutable state with the loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A message entered the log (assistant messages are announced when the
    /// stream opens, with the in-progress shell).
    MessageStart { message: Message },
    /// One streaming event for the in-progress assistant message
    /// (text/thinking/toolcall start, delta, end).
    MessageUpdate { event: StreamEvent },
    /// The message is final and appended to the log.
    MessageEnd { message: Message },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial: String,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolResultMessage,
        is_error: bool,
    },
    /// A queue gained, lost, or re-ordered messages.
    QueueChanged {
        kind: QueueKind,
        messages: Vec<QueuedUserMessage>,
    },
    CompactionStarted,
    CompactionFinished {
        summary: String,
        first_kept_entry_id: String,
        tokens_before: u64,
    },
    StateChanged { state: LoopState },
    Error { message: String },
}
