// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use arne_model::ToolContentPart;

/// Partial progress from a running tool, forwarded to subscribers so long
/// commands render incrementally.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    pub tool_call_id: String,
    /// Current visible output (already truncated to the tool's budget).
    pub content: String,
}

/// Callback invoked by a tool on each progress chunk.
pub type OnUpdate = Box<dyn Fn(ToolUpdate) + Send + Sync>;

/// A no-op progress callback for callers that do not render progress.
pub fn no_update() -> OnUpdate {
    Box::new(|_| {})
}

/// The result of executing a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub content: Vec<ToolContentPart>,
    /// Machine-readable extras (exit code, spill file path, pid, ...).
    pub details: Option<Value>,
    /// A failed execution still produces a result; the model sees the error
    /// text and can react.
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContentPart::Text { text: text.into() }],
            details: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContentPart::Text { text: text.into() }],
            details: None,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Concatenated text content.
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

/// Trait that every tool must implement.
///
/// Tools receive an abort token and must surrender within a short grace
/// window after it fires; process-based tools escalate to killing their
/// whole process tree.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    /// Human-readable label for progress display.
    fn label(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are reported through
    /// [`ToolResult::error`], never by panicking.
    async fn execute(
        &self,
        tool_call_id: &str,
        args: &Value,
        abort: CancellationToken,
        on_update: &OnUpdate,
    ) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_is_not_error() {
        let r = ToolResult::ok("fine");
        assert!(!r.is_error);
        assert_eq!(r.text(), "fine");
    }

    #[test]
    fn error_result_sets_flag() {
        let r = ToolResult::error("boom");
        assert!(r.is_error);
        assert_eq!(r.text(), "boom");
    }

    #[test]
    fn details_attach() {
        let r = ToolResult::ok("x").with_details(serde_json::json!({"exitCode": 0}));
        assert_eq!(r.details.unwrap()["exitCode"], 0);
    }

    #[test]
    fn text_joins_parts_and_skips_images() {
        let r = ToolResult {
            content: vec![
                ToolContentPart::Text { text: "a".into() },
                ToolContentPart::Image { image_url: "data:image/png;base64,AA".into() },
                ToolContentPart::Text { text: "b".into() },
            ],
            details: None,
            is_error: false,
        };
        assert_eq!(r.text(), "a\nb");
    }
}
