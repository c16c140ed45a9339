// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Protocol-neutral model transport: message types, the shared streaming
//! event shape, provider adapters, retry, and request sanitization.

pub mod anthropic;
pub mod api_key;
pub mod catalog;
pub mod mock;
pub mod partial_json;
pub mod provider;
pub mod retry;
pub mod sanitize;
pub mod stream;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use api_key::ApiKeySpec;
pub use catalog::{cost_for, lookup, models_for, next_model, ModelEntry, CATALOG};
pub use mock::{MockProvider, ScriptedProvider};
pub use partial_json::parse_partial;
pub use provider::{EventStream, Provider};
pub use retry::{classify_transport, with_retry, ErrorClass, RetryPolicy, TransportError};
pub use stream::{MessageAccumulator, StreamEvent};
pub use types::{
    now_millis, AssistantMessage, BashExecutionMessage, BranchSummaryMessage,
    CompactionSummaryMessage, CompletionOptions, CompletionRequest, ContentBlock, ContentPart,
    CustomMessage, Message, StopReason, ThinkingLevel, ToolContentPart, ToolResultMessage,
    ToolSchema, Usage, UsageCost, UsageDelta, UserContent, UserMessage,
};
