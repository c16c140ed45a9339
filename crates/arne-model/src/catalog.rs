// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static model catalog: context windows, output limits, and pricing.
//!
//! The catalog is the single source of truth for per-model metadata.  Prices
//! are dollars per million tokens; [`cost_for`] converts a [`Usage`] into a
//! [`UsageCost`] breakdown.

use crate::types::{Usage, UsageCost};

/// Metadata for one model known to the catalog.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub provider: &'static str,
    pub id: &'static str,
    pub display_name: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// $/MTok for fresh input tokens.
    pub input_per_mtok: f64,
    /// $/MTok for output tokens.
    pub output_per_mtok: f64,
    /// $/MTok for prompt-cache reads.
    pub cache_read_per_mtok: f64,
    /// $/MTok for prompt-cache writes.
    pub cache_write_per_mtok: f64,
    pub supports_images: bool,
    pub supports_thinking: bool,
}

/// Complete static catalog in cycle order.
pub static CATALOG: &[ModelEntry] = &[
    ModelEntry {
        provider: "anthropic",
        id: "claude-opus-4-5",
        display_name: "Claude Opus 4.5",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_per_mtok: 5.0,
        output_per_mtok: 25.0,
        cache_read_per_mtok: 0.5,
        cache_write_per_mtok: 6.25,
        supports_images: true,
        supports_thinking: true,
    },
    ModelEntry {
        provider: "anthropic",
        id: "claude-sonnet-4-5",
        display_name: "Claude Sonnet 4.5",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_per_mtok: 3.0,
        output_per_mtok: 15.0,
        cache_read_per_mtok: 0.3,
        cache_write_per_mtok: 3.75,
        supports_images: true,
        supports_thinking: true,
    },
    ModelEntry {
        provider: "anthropic",
        id: "claude-haiku-4-5",
        display_name: "Claude Haiku 4.5",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_per_mtok: 1.0,
        output_per_mtok: 5.0,
        cache_read_per_mtok: 0.1,
        cache_write_per_mtok: 1.25,
        supports_images: true,
        supports_thinking: true,
    },
    // Deterministic test model; no network, no cost.
    ModelEntry {
        provider: "mock",
        id: "mock-model",
        display_name: "Mock",
        context_window: 32_000,
        max_output_tokens: 4_096,
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
        cache_read_per_mtok: 0.0,
        cache_write_per_mtok: 0.0,
        supports_images: false,
        supports_thinking: false,
    },
];

/// Look up a model by provider id and model id.
pub fn lookup(provider: &str, model: &str) -> Option<&'static ModelEntry> {
    CATALOG.iter().find(|e| e.provider == provider && e.id == model)
}

/// All catalog entries for one provider, in declaration order.
pub fn models_for(provider: &str) -> Vec<&'static ModelEntry> {
    CATALOG.iter().filter(|e| e.provider == provider).collect()
}

/// The entry following `(provider, model)` in catalog order, wrapping around.
/// Used to cycle through models from the UI.
pub fn next_model(provider: &str, model: &str) -> &'static ModelEntry {
    let idx = CATALOG
        .iter()
        .position(|e| e.provider == provider && e.id == model)
        .map(|i| (i + 1) % CATALOG.len())
        .unwrap_or(0);
    &CATALOG[idx]
}

/// Dollar cost of `usage` under `entry`'s price table.
pub fn cost_for(entry: &ModelEntry, usage: &Usage) -> UsageCost {
    let per = |tokens: u64, rate: f64| (tokens as f64 / 1_000_000.0) * rate;
    let input = per(usage.input, entry.input_per_mtok);
    let output = per(usage.output, entry.output_per_mtok);
    let cache_read = per(usage.cache_read, entry.cache_read_per_mtok);
    let cache_write = per(usage.cache_write, entry.cache_write_per_mtok);
    UsageCost { input, output, cache_read, cache_write, total: input + output + cache_read + cache_write }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique_per_provider() {
        let mut seen = std::collections::HashSet::new();
        for e in CATALOG {
            assert!(seen.insert((e.provider, e.id)), "duplicate: {}/{}", e.provider, e.id);
        }
    }

    #[test]
    fn lookup_finds_known_model() {
        let e = lookup("anthropic", "claude-sonnet-4-5").unwrap();
        assert_eq!(e.context_window, 200_000);
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("anthropic", "no-such-model").is_none());
    }

    #[test]
    fn next_model_cycles_and_wraps() {
        let first = &CATALOG[0];
        let last = &CATALOG[CATALOG.len() - 1];
        let wrapped = next_model(last.provider, last.id);
        assert_eq!(wrapped.id, first.id);
    }

    #[test]
    fn next_model_for_unknown_falls_back_to_first() {
        assert_eq!(next_model("x", "y").id, CATALOG[0].id);
    }

    #[test]
    fn cost_scales_with_tokens() {
        let e = lookup("anthropic", "claude-sonnet-4-5").unwrap();
        let usage = Usage {
            input: 1_000_000,
            output: 1_000_000,
            cache_read: 0,
            cache_write: 0,
            total_tokens: 2_000_000,
            cost: UsageCost::default(),
        };
        let cost = cost_for(e, &usage);
        assert!((cost.input - 3.0).abs() < 1e-9);
        assert!((cost.output - 15.0).abs() < 1e-9);
        assert!((cost.total - 18.0).abs() < 1e-9);
    }

    #[test]
    fn mock_model_is_free() {
        let e = lookup("mock", "mock-model").unwrap();
        let usage = Usage { input: 500, output: 500, ..Default::default() };
        assert_eq!(cost_for(e, &usage).total, 0.0);
    }
}
