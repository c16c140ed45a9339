// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/arne/config.yaml"));
        paths.push(home.join(".config/arne/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("arne/config.yaml"));
        paths.push(cfg.join("arne/config.yml"));
    }

    // Workspace-local overrides
    paths.push(PathBuf::from(".arne/config.yaml"));
    paths.push(PathBuf::from(".arne/config.yml"));
    paths.push(PathBuf::from("arne.yaml"));
    paths.push(PathBuf::from("arne.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (the `--config` flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_yaml(&mut merged, load_yaml(&path)?);
        }
    }
    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_yaml(&mut merged, load_yaml(p)?);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("invalid configuration")?
    };
    Ok(config)
}

fn load_yaml(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "model:\n  provider: mock\n  name: mock-model\n").unwrap();
        let c = load(Some(&path)).unwrap();
        assert_eq!(c.model.provider, "mock");
    }

    #[test]
    fn missing_files_yield_defaults() {
        // No explicit file and (almost certainly) no arne config on CI hosts.
        let c = load(None).unwrap();
        assert!(!c.model.name.is_empty());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "model: [not: a: mapping").unwrap();
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn merge_overrides_scalars_and_keeps_siblings() {
        let mut base: serde_yaml::Value =
            serde_yaml::from_str("agent:\n  reserve_tokens: 100\n  shell: bash\n").unwrap();
        let over: serde_yaml::Value =
            serde_yaml::from_str("agent:\n  reserve_tokens: 200\n").unwrap();
        merge_yaml(&mut base, over);
        let merged: Config = serde_yaml::from_value(base).unwrap();
        assert_eq!(merged.agent.reserve_tokens, 200);
        assert_eq!(merged.agent.shell, "bash");
    }
}
