// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::provider::{EventStream, Provider};
use crate::stream::StreamEvent;
use crate::types::{
    AssistantMessage, CompletionRequest, Message, StopReason, UsageDelta,
};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as a single streamed text block.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User(u) => u.content.as_text().map(str::to_string),
                _ => None,
            })
            .unwrap_or_else(|| "[no input]".to_string());

        let start = AssistantMessage::started(self.name(), self.model_name(), self.api());
        let events = vec![
            Ok(StreamEvent::Start { message: start }),
            Ok(StreamEvent::TextStart { index: 0 }),
            Ok(StreamEvent::TextDelta { index: 0, delta: format!("MOCK: {reply}") }),
            Ok(StreamEvent::TextEnd { index: 0, content: format!("MOCK: {reply}") }),
            Ok(StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::Stop),
                usage: Some(UsageDelta {
                    input: Some(10),
                    output: Some(10),
                    ..Default::default()
                }),
            }),
            Ok(StreamEvent::Done { reason: StopReason::Stop }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider: each `stream` call pops the next event script
/// off the queue.  Tests specify exact sequences — including tool calls and
/// mid-stream errors — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The last request seen, for assertions on what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` the
    /// event sequence for that call.  A leading `Start` event is synthesized
    /// automatically when the script does not begin with one.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that answers every call with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Event script for one plain text turn.
    pub fn text_script(reply: impl Into<String>) -> Vec<StreamEvent> {
        let text = reply.into();
        vec![
            StreamEvent::TextStart { index: 0 },
            StreamEvent::TextDelta { index: 0, delta: text.clone() },
            StreamEvent::TextEnd { index: 0, content: text },
            StreamEvent::MessageDelta {
                stop_reason: Some(StopReason::Stop),
                usage: Some(UsageDelta { input: Some(5), output: Some(5), ..Default::default() }),
            },
            StreamEvent::Done { reason: StopReason::Stop },
        ]
    }

    /// Event script for a turn that requests one tool call.
    pub fn tool_call_script(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Vec<StreamEvent> {
        let args_json = arguments.to_string();
        vec![
            StreamEvent::ToolCallStart { index: 0, id: id.into(), name: name.into() },
            StreamEvent::ToolCallDelta { index: 0, delta: args_json },
            StreamEvent::ToolCallEnd { index: 0, arguments },
            StreamEvent::MessageDelta { stop_reason: Some(StopReason::ToolUse), usage: None },
            StreamEvent::Done { reason: StopReason::ToolUse },
        ]
    }

    /// Two-round script: a tool call, then a text reply.
    pub fn tool_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(id, name, arguments),
            Self::text_script(final_text),
        ])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let mut events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Self::text_script("[no more scripts]")
            } else {
                scripts.remove(0)
            }
        };
        if !matches!(events.first(), Some(StreamEvent::Start { .. })) {
            let start = AssistantMessage::started(self.name(), self.model_name(), self.api());
            events.insert(0, StreamEvent::Start { message: start });
        }
        let wrapped: Vec<anyhow::Result<StreamEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
