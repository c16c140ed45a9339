// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Directory for session journal files.  Defaults to
    /// `~/.local/share/arne/sessions` (platform equivalent).
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
    /// Named provider endpoints.  Keys are provider ids referenced by
    /// `model.provider`.
    ///
    /// ```yaml
    /// providers:
    ///   anthropic:
    ///     api_key: ANTHROPIC_API_KEY          # env var name
    ///   work:
    ///     base_url: https://llm.internal.example
    ///     api_key: "!pass show work/llm-key"  # command; stdout is the key
    ///     models: [claude-sonnet-4-5]
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider id (`anthropic`, `mock`, or a key from `providers`).
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { provider: "anthropic".into(), name: "claude-sonnet-4-5".into() }
    }
}

/// One provider endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL override; hosted providers have sensible defaults.
    pub base_url: Option<String>,
    /// API key spec: a literal key, an environment variable name, or a
    /// command prefixed with `!` whose trimmed stdout is the key.
    pub api_key: Option<String>,
    /// Wire flavor when the endpoint mimics another provider's API.
    pub api_flavor: Option<String>,
    /// Models offered by this endpoint, for pickers and validation.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Compact automatically when the context approaches the window.
    #[serde(default = "default_true")]
    pub auto_compaction: bool,
    /// Tokens held back from the context window for the response.
    #[serde(default = "AgentConfig::default_reserve_tokens")]
    pub reserve_tokens: u64,
    /// Queue drain mode: `one_at_a_time` or `all`.
    #[serde(default)]
    pub queue_mode: QueueModeConfig,
    /// Login shell for the bash tool.
    #[serde(default = "AgentConfig::default_shell")]
    pub shell: String,
    /// Per-invocation tool timeout in seconds.
    #[serde(default = "AgentConfig::default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl AgentConfig {
    fn default_reserve_tokens() -> u64 {
        16_384
    }
    fn default_shell() -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "bash".into())
    }
    fn default_tool_timeout_secs() -> u64 {
        120
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_compaction: true,
            reserve_tokens: Self::default_reserve_tokens(),
            queue_mode: QueueModeConfig::default(),
            shell: Self::default_shell(),
            tool_timeout_secs: Self::default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueModeConfig {
    #[default]
    OneAtATime,
    All,
}

impl Config {
    /// Effective sessions directory, creating the default path lazily.
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("arne")
                .join("sessions")
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let c = Config::default();
        assert_eq!(c.model.provider, "anthropic");
        assert!(c.agent.auto_compaction);
        assert!(c.agent.reserve_tokens > 0);
    }

    #[test]
    fn parses_minimal_yaml() {
        let c: Config = serde_yaml::from_str("model:\n  provider: mock\n  name: mock-model\n").unwrap();
        assert_eq!(c.model.provider, "mock");
        assert!(c.providers.is_empty());
    }

    #[test]
    fn parses_provider_table_with_key_specs() {
        let yaml = r#"
providers:
  anthropic:
    api_key: ANTHROPIC_API_KEY
  local:
    base_url: http://localhost:8080
    api_key: "!cat /tmp/key"
    models: [m1, m2]
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.providers["anthropic"].api_key.as_deref(), Some("ANTHROPIC_API_KEY"));
        assert_eq!(c.providers["local"].models, vec!["m1", "m2"]);
    }

    #[test]
    fn queue_mode_parses_snake_case() {
        let c: Config = serde_yaml::from_str("agent:\n  queue_mode: all\n").unwrap();
        assert_eq!(c.agent.queue_mode, QueueModeConfig::All);
    }

    #[test]
    fn auto_compaction_defaults_on_when_agent_section_partial() {
        let c: Config = serde_yaml::from_str("agent:\n  reserve_tokens: 1000\n").unwrap();
        assert!(c.agent.auto_compaction);
        assert_eq!(c.agent.reserve_tokens, 1000);
    }
}
