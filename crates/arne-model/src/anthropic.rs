// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::partial_json::parse_partial;
use crate::provider::{EventStream, Provider};
use crate::retry::{classify_transport, with_retry, RetryPolicy, TransportError};
use crate::sanitize::scrub_lone_surrogates;
use crate::stream::StreamEvent;
use crate::types::{
    AssistantMessage, CompletionRequest, ContentBlock, ContentPart, Message, StopReason,
    ToolContentPart, UsageDelta, UserContent,
};

/// Streaming adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    /// Mark the system prompt and the last user content block as ephemerally
    /// cacheable.  Purely a request-shape decision; skipped entirely when off.
    cache_prompts: bool,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Self {
        // Per-attempt limits: a stuck connect fails fast and gets retried;
        // the overall cap bounds a stream that stops making progress.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(20))
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .unwrap_or_default();
        Self {
            model: model.into(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            cache_prompts: true,
            client,
        }
    }

    pub fn with_cache_prompts(mut self, on: bool) -> Self {
        self.cache_prompts = on;
        self
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let mut messages = build_wire_messages(&req.messages);

        if self.cache_prompts {
            mark_last_user_block_cacheable(&mut messages);
        }

        let max_tokens = req
            .options
            .max_tokens
            .or_else(|| self.max_output_tokens())
            .unwrap_or(4096);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": true,
        });
        if let Some(t) = req.options.temperature {
            body["temperature"] = json!(t);
        }
        if !req.system_prompt.is_empty() {
            if self.cache_prompts {
                body["system"] = json!([{
                    "type": "text",
                    "text": req.system_prompt,
                    "cache_control": { "type": "ephemeral" },
                }]);
            } else {
                body["system"] = json!(req.system_prompt);
            }
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if let Some(budget) = req.options.thinking_budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        let key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no API key configured for anthropic"))?;

        let body = self.build_body(&req);
        debug!(model = %self.model, tools = req.tools.len(), "sending anthropic request");

        let policy = RetryPolicy::default().with_max_delay_ms(req.options.max_retry_delay_ms);
        let url = format!("{}/v1/messages", self.base_url);
        let headers = req.options.headers.clone().unwrap_or_default();

        // Transient failures (connect errors, 5xx, 429) are retried before
        // the stream opens; once bytes are flowing a failure ends the turn.
        let resp = with_retry(policy, &req.options.abort, classify_transport, |_attempt| {
            let mut builder = self
                .client
                .post(&url)
                .header("x-api-key", &key)
                .header("anthropic-version", "2023-06-01");
            for (k, v) in &headers {
                builder = builder.header(k, v);
            }
            let body = body.clone();
            async move {
                let resp = builder
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| TransportError::Network(e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(TransportError::Http { status: status.as_u16(), body: text }.into());
                }
                Ok(resp)
            }
        })
        .await?;

        let start = AssistantMessage::started(self.name(), self.model_name(), self.api());
        let byte_stream = resp.bytes_stream();

        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward; only complete lines are parsed.  Per-block state
        // maps the wire index onto the typed end events.
        let sse_events = byte_stream
            .scan(SseState::default(), |state, chunk| {
                let events = match chunk {
                    Ok(bytes) => {
                        state.buf.push_str(&String::from_utf8_lossy(&bytes));
                        let mut out = Vec::new();
                        while let Some(pos) = state.buf.find('\n') {
                            let line = state.buf[..pos].trim_end_matches('\r').to_string();
                            state.buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    out.extend(state.handle(&v).into_iter().map(Ok));
                                }
                            }
                        }
                        out
                    }
                    Err(e) => vec![Err(anyhow::Error::from(TransportError::Network(e.to_string())))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        let stream = futures::stream::iter([Ok(StreamEvent::Start { message: start })]).chain(sse_events);
        Ok(Box::pin(stream))
    }
}

// ─── SSE event mapping ────────────────────────────────────────────────────────

enum BlockKind {
    Text { buf: String },
    Thinking { buf: String },
    ToolCall { args_buf: String },
}

#[derive(Default)]
struct SseState {
    buf: String,
    blocks: HashMap<u64, BlockKind>,
    stop_reason: Option<StopReason>,
}

impl SseState {
    fn handle(&mut self, v: &Value) -> Vec<StreamEvent> {
        match v["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &v["message"]["usage"];
                if usage.is_object() {
                    vec![StreamEvent::MessageDelta {
                        stop_reason: None,
                        usage: Some(UsageDelta {
                            input: usage["input_tokens"].as_u64(),
                            // Reported only here; a later message_delta that
                            // omits them must not zero these out.
                            cache_read: usage["cache_read_input_tokens"].as_u64(),
                            cache_write: usage["cache_creation_input_tokens"].as_u64(),
                            ..Default::default()
                        }),
                    }]
                } else {
                    vec![]
                }
            }
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let block = &v["content_block"];
                match block["type"].as_str().unwrap_or("") {
                    "tool_use" => {
                        let id = block["id"].as_str().unwrap_or("").to_string();
                        let name = block["name"].as_str().unwrap_or("").to_string();
                        self.blocks.insert(index, BlockKind::ToolCall { args_buf: String::new() });
                        vec![StreamEvent::ToolCallStart { index: index as usize, id, name }]
                    }
                    "thinking" => {
                        self.blocks.insert(index, BlockKind::Thinking { buf: String::new() });
                        vec![StreamEvent::ThinkingStart { index: index as usize }]
                    }
                    _ => {
                        self.blocks.insert(index, BlockKind::Text { buf: String::new() });
                        vec![StreamEvent::TextStart { index: index as usize }]
                    }
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("").to_string();
                        if let Some(BlockKind::Text { buf }) = self.blocks.get_mut(&index) {
                            buf.push_str(&text);
                        }
                        vec![StreamEvent::TextDelta { index: index as usize, delta: text }]
                    }
                    "thinking_delta" => {
                        let text = delta["thinking"].as_str().unwrap_or("").to_string();
                        if let Some(BlockKind::Thinking { buf }) = self.blocks.get_mut(&index) {
                            buf.push_str(&text);
                        }
                        vec![StreamEvent::ThinkingDelta { index: index as usize, delta: text }]
                    }
                    "signature_delta" => {
                        let sig = delta["signature"].as_str().unwrap_or("").to_string();
                        vec![StreamEvent::SignatureDelta { index: index as usize, delta: sig }]
                    }
                    "input_json_delta" => {
                        let fragment = delta["partial_json"].as_str().unwrap_or("").to_string();
                        if let Some(BlockKind::ToolCall { args_buf }) = self.blocks.get_mut(&index) {
                            args_buf.push_str(&fragment);
                        }
                        vec![StreamEvent::ToolCallDelta { index: index as usize, delta: fragment }]
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0);
                match self.blocks.remove(&index) {
                    Some(BlockKind::Text { buf }) => {
                        vec![StreamEvent::TextEnd { index: index as usize, content: buf }]
                    }
                    Some(BlockKind::Thinking { buf }) => {
                        vec![StreamEvent::ThinkingEnd { index: index as usize, content: buf }]
                    }
                    Some(BlockKind::ToolCall { args_buf }) => {
                        vec![StreamEvent::ToolCallEnd {
                            index: index as usize,
                            arguments: finalize_arguments(&args_buf),
                        }]
                    }
                    None => vec![],
                }
            }
            "message_delta" => {
                let stop_reason = match v["delta"]["stop_reason"].as_str() {
                    Some("end_turn") | Some("stop_sequence") => Some(StopReason::Stop),
                    Some("tool_use") => Some(StopReason::ToolUse),
                    Some("max_tokens") => Some(StopReason::Length),
                    _ => None,
                };
                if let Some(sr) = stop_reason {
                    self.stop_reason = Some(sr);
                }
                let usage = v.get("usage").filter(|u| u.is_object()).map(|u| UsageDelta {
                    output: u["output_tokens"].as_u64(),
                    ..Default::default()
                });
                if stop_reason.is_none() && usage.is_none() {
                    vec![]
                } else {
                    vec![StreamEvent::MessageDelta { stop_reason, usage }]
                }
            }
            "message_stop" => {
                vec![StreamEvent::Done { reason: self.stop_reason.unwrap_or(StopReason::Stop) }]
            }
            "error" => {
                let msg = v["error"]["message"].as_str().unwrap_or("provider error").to_string();
                vec![StreamEvent::Error { reason: StopReason::Error, message: msg }]
            }
            _ => vec![],
        }
    }
}

/// Strict-parse the accumulated argument buffer, falling back to the
/// tolerant parser so the end event always carries a usable value.
fn finalize_arguments(args_buf: &str) -> Value {
    if args_buf.trim().is_empty() {
        return Value::Object(Default::default());
    }
    let scrubbed = scrub_lone_surrogates(args_buf);
    match serde_json::from_str(&scrubbed) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "tool-call arguments were not strict JSON; using tolerant parse");
            parse_partial(&scrubbed)
        }
    }
}

// ─── Wire message building ────────────────────────────────────────────────────

/// Convert the conversation into Anthropic wire messages.
///
/// Consecutive tool results are coalesced into a single user message whose
/// content blocks are the results in order — the API rejects interleaved
/// singleton tool-result messages for parallel tool calls.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush_results = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({ "role": "user", "content": std::mem::take(pending) }));
        }
    };

    for m in messages {
        match m {
            Message::ToolResult(r) => {
                let content: Value = if r.content.len() == 1 {
                    match &r.content[0] {
                        ToolContentPart::Text { text } => json!(text),
                        part => json!([tool_part_to_wire(part)]),
                    }
                } else {
                    json!(r.content.iter().map(tool_part_to_wire).collect::<Vec<_>>())
                };
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": r.tool_call_id,
                    "content": content,
                    "is_error": r.is_error,
                }));
            }
            other => {
                flush_results(&mut out, &mut pending_results);
                if let Some(v) = message_to_wire(other) {
                    out.push(v);
                }
            }
        }
    }
    flush_results(&mut out, &mut pending_results);
    out
}

fn tool_part_to_wire(part: &ToolContentPart) -> Value {
    match part {
        ToolContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ToolContentPart::Image { image_url } => image_to_wire(image_url),
    }
}

fn image_to_wire(image_url: &str) -> Value {
    if let Some((mime, data)) = parse_data_url(image_url) {
        json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime, "data": data }
        })
    } else {
        json!({
            "type": "image",
            "source": { "type": "url", "url": image_url }
        })
    }
}

fn message_to_wire(m: &Message) -> Option<Value> {
    match m {
        Message::User(u) => match &u.content {
            UserContent::Text(t) => Some(json!({ "role": "user", "content": t })),
            UserContent::Parts(parts) => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => image_to_wire(image_url),
                    })
                    .collect();
                Some(json!({ "role": "user", "content": content }))
            }
        },
        Message::Assistant(a) => {
            let content: Vec<Value> = a
                .content
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                    ContentBlock::Thinking { thinking, signature } => json!({
                        "type": "thinking",
                        "thinking": thinking,
                        "signature": signature.clone().unwrap_or_default(),
                    }),
                    ContentBlock::ToolCall { id, name, arguments } => json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": arguments,
                    }),
                })
                .collect();
            if content.is_empty() {
                None
            } else {
                Some(json!({ "role": "assistant", "content": content }))
            }
        }
        // Rendered text roles: the context builder normally folds these
        // before a request is built, but an unfolded one still round-trips
        // as plain user text rather than being lost.
        Message::BashExecution(b) => Some(json!({
            "role": "user",
            "content": format!("$ {}\n{}", b.command, b.output),
        })),
        Message::BranchSummary(s) => Some(json!({ "role": "user", "content": s.summary })),
        Message::CompactionSummary(s) => Some(json!({ "role": "user", "content": s.summary })),
        Message::Custom(_) => None,
        Message::ToolResult(_) => unreachable!("tool results are coalesced by the caller"),
    }
}

/// Attach an ephemeral cache marker to the last content block of the last
/// user message, converting a plain-string content into a block array first.
fn mark_last_user_block_cacheable(messages: &mut [Value]) {
    let Some(last_user) = messages.iter_mut().rev().find(|m| m["role"] == "user") else {
        return;
    };
    let content = &mut last_user["content"];
    if let Some(text) = content.as_str() {
        *content = json!([{ "type": "text", "text": text }]);
    }
    if let Some(blocks) = content.as_array_mut() {
        if let Some(last) = blocks.last_mut() {
            last["cache_control"] = json!({ "type": "ephemeral" });
        }
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, b64) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Some((mime, b64.to_string()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_identity() {
        let p = AnthropicProvider::new("claude-sonnet-4-5", None, None);
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model_name(), "claude-sonnet-4-5");
    }

    #[test]
    fn message_start_yields_cache_usage() {
        let mut s = SseState::default();
        let evs = s.handle(&json!({
            "type": "message_start",
            "message": { "usage": {
                "input_tokens": 50, "cache_read_input_tokens": 40, "cache_creation_input_tokens": 10
            }}
        }));
        match &evs[0] {
            StreamEvent::MessageDelta { usage: Some(u), .. } => {
                assert_eq!(u.input, Some(50));
                assert_eq!(u.cache_read, Some(40));
                assert_eq!(u.cache_write, Some(10));
                assert_eq!(u.output, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_use_block_maps_to_typed_start_delta_end() {
        let mut s = SseState::default();
        let start = s.handle(&json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": { "type": "tool_use", "id": "tc_1", "name": "bash" }
        }));
        assert!(matches!(&start[0], StreamEvent::ToolCallStart { id, name, .. }
            if id == "tc_1" && name == "bash"));

        s.handle(&json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": { "type": "input_json_delta", "partial_json": "{\"command\": \"ls\"" }
        }));
        let end = s.handle(&json!({ "type": "content_block_stop", "index": 1 }));
        // Malformed accumulated JSON still yields a value at the end event.
        assert!(matches!(&end[0], StreamEvent::ToolCallEnd { arguments, .. } if !arguments.is_null()));
    }

    #[test]
    fn thinking_block_maps_signature_delta() {
        let mut s = SseState::default();
        s.handle(&json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": { "type": "thinking" }
        }));
        let evs = s.handle(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "signature_delta", "signature": "c2ln" }
        }));
        assert!(matches!(&evs[0], StreamEvent::SignatureDelta { delta, .. } if delta == "c2ln"));
    }

    #[test]
    fn stop_reason_is_latched_for_message_stop() {
        let mut s = SseState::default();
        s.handle(&json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } }));
        let evs = s.handle(&json!({ "type": "message_stop" }));
        assert!(matches!(&evs[0], StreamEvent::Done { reason: StopReason::ToolUse }));
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let mut s = SseState::default();
        let evs = s.handle(&json!({ "type": "message_delta", "delta": { "stop_reason": "max_tokens" } }));
        assert!(matches!(
            &evs[0],
            StreamEvent::MessageDelta { stop_reason: Some(StopReason::Length), .. }
        ));
    }

    #[test]
    fn consecutive_tool_results_coalesce_into_one_user_message() {
        let messages = vec![
            Message::user("run things"),
            Message::tool_result("t1", "bash", "out1", false),
            Message::tool_result("t2", "bash", "out2", true),
        ];
        let wire = build_wire_messages(&messages);
        assert_eq!(wire.len(), 2);
        let blocks = wire[1]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["tool_use_id"], "t1");
        assert_eq!(blocks[1]["tool_use_id"], "t2");
        assert_eq!(blocks[1]["is_error"], true);
    }

    #[test]
    fn cache_marker_lands_on_last_user_block() {
        let mut wire = build_wire_messages(&[Message::user("hi"), Message::assistant_text("yo")]);
        mark_last_user_block_cacheable(&mut wire);
        let blocks = wire[0]["content"].as_array().unwrap();
        assert_eq!(blocks.last().unwrap()["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn empty_assistant_message_is_omitted_from_wire() {
        let a = AssistantMessage::started("anthropic", "m", "messages");
        let wire = build_wire_messages(&[Message::user("q"), Message::Assistant(a)]);
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn finalize_arguments_empty_buffer_yields_object() {
        assert_eq!(finalize_arguments(""), json!({}));
        assert_eq!(finalize_arguments("  "), json!({}));
    }

    #[test]
    fn body_includes_system_cache_control() {
        let p = AnthropicProvider::new("claude-sonnet-4-5", Some("k".into()), None);
        let req = CompletionRequest {
            messages: vec![Message::user("hello")],
            system_prompt: "be brief".into(),
            ..Default::default()
        };
        let body = p.build_body(&req);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn body_thinking_budget_is_forwarded() {
        let p = AnthropicProvider::new("claude-sonnet-4-5", Some("k".into()), None);
        let mut req = CompletionRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        };
        req.options.thinking_budget = Some(2048);
        let body = p.build_body(&req);
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
    }
}
