// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! API key resolution.
//!
//! A provider's configured key spec is one of three shapes:
//!
//! - `!some-command args` — run the command, the trimmed stdout is the key;
//! - `ANTHROPIC_API_KEY`  — an environment variable name (all-caps
//!   identifier), read at resolution time;
//! - anything else        — a literal key.
//!
//! Empty output, a failing command, or an unset variable all resolve to
//! "no key"; whether that is an error is the caller's decision.

use tracing::warn;

/// Parsed form of an api-key spec string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeySpec {
    Literal(String),
    Env(String),
    Command(String),
}

impl ApiKeySpec {
    /// Classify a raw spec string.  A leading `!` means command; an
    /// all-caps identifier is treated as an environment variable name.
    pub fn parse(raw: &str) -> Self {
        if let Some(cmd) = raw.strip_prefix('!') {
            return Self::Command(cmd.trim().to_string());
        }
        if is_env_var_name(raw) {
            return Self::Env(raw.to_string());
        }
        Self::Literal(raw.to_string())
    }

    /// Resolve to a key, or `None` when no usable key is available.
    pub fn resolve(&self) -> Option<String> {
        match self {
            Self::Literal(key) => non_empty(key.clone()),
            Self::Env(name) => std::env::var(name).ok().and_then(non_empty),
            Self::Command(cmd) => run_key_command(cmd),
        }
    }
}

fn is_env_var_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim().to_string();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

fn run_key_command(cmd: &str) -> Option<String> {
    let output = std::process::Command::new("sh").arg("-c").arg(cmd).output();
    match output {
        Ok(out) if out.status.success() => {
            non_empty(String::from_utf8_lossy(&out.stdout).to_string())
        }
        Ok(out) => {
            warn!(command = %cmd, status = ?out.status.code(), "api key command failed");
            None
        }
        Err(e) => {
            warn!(command = %cmd, error = %e, "api key command could not be spawned");
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bang_prefix_parses_as_command() {
        assert_eq!(ApiKeySpec::parse("!pass show anthropic"), ApiKeySpec::Command("pass show anthropic".into()));
    }

    #[test]
    fn all_caps_identifier_parses_as_env() {
        assert_eq!(ApiKeySpec::parse("MY_API_KEY"), ApiKeySpec::Env("MY_API_KEY".into()));
    }

    #[test]
    fn mixed_case_parses_as_literal() {
        assert_eq!(ApiKeySpec::parse("sk-abc123"), ApiKeySpec::Literal("sk-abc123".into()));
    }

    #[test]
    fn literal_resolves_to_itself() {
        assert_eq!(ApiKeySpec::parse("sk-abc123").resolve(), Some("sk-abc123".into()));
    }

    #[test]
    fn empty_literal_resolves_to_none() {
        assert_eq!(ApiKeySpec::Literal(String::new()).resolve(), None);
    }

    #[test]
    fn env_var_resolves_through_environment() {
        std::env::set_var("ARNE_TEST_KEY_VAR", "from-env");
        assert_eq!(ApiKeySpec::parse("ARNE_TEST_KEY_VAR").resolve(), Some("from-env".into()));
        std::env::remove_var("ARNE_TEST_KEY_VAR");
    }

    #[test]
    fn unset_env_var_resolves_to_none() {
        assert_eq!(ApiKeySpec::Env("ARNE_DEFINITELY_UNSET_VAR".into()).resolve(), None);
    }

    #[test]
    fn command_stdout_is_trimmed() {
        assert_eq!(
            ApiKeySpec::parse("!printf '  the-key\\n'").resolve(),
            Some("the-key".into())
        );
    }

    #[test]
    fn failing_command_resolves_to_none() {
        assert_eq!(ApiKeySpec::parse("!exit 3").resolve(), None);
    }

    #[test]
    fn empty_command_output_resolves_to_none() {
        assert_eq!(ApiKeySpec::parse("!true").resolve(), None);
    }
}
