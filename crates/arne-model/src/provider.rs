// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{catalog, CompletionRequest, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// A streaming model provider.
///
/// Implementations translate the provider's wire protocol into the shared
/// [`StreamEvent`] sequence; everything above this trait is protocol-neutral.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id for catalog lookups and display (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Wire API flavor stamped onto assistant messages (e.g. `"messages"`).
    fn api(&self) -> &str {
        "messages"
    }

    /// Open a streaming completion.  The returned stream yields events in
    /// wire order and ends with exactly one terminal event; transient
    /// request failures are retried internally before the stream opens.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream>;

    /// Context window from the static catalog; `None` for unknown models.
    fn context_window(&self) -> Option<u32> {
        catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// Maximum output tokens from the static catalog.
    fn max_output_tokens(&self) -> Option<u32> {
        catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }

    /// Whether the model accepts image input.  Defaults to `false` for
    /// unknown models so images are stripped rather than rejected serverside.
    fn supports_images(&self) -> bool {
        catalog::lookup(self.name(), self.model_name())
            .map(|e| e.supports_images)
            .unwrap_or(false)
    }

    /// Whether the model supports extended thinking.
    fn supports_thinking(&self) -> bool {
        catalog::lookup(self.name(), self.model_name())
            .map(|e| e.supports_thinking)
            .unwrap_or(false)
    }
}
