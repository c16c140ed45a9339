// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool execution: the [`Tool`] trait, the registry, and the built-in tools
//! (shell with streaming/cancellation/truncation, file operations, search).

mod bash;
mod fs;
mod registry;
mod search;
mod tool;

pub use bash::{BashTool, InteractiveExecutor, InteractivePredicate};
pub use fs::{EditFileTool, ReadFileTool, WriteFileTool};
pub use registry::ToolRegistry;
pub use search::{GlobTool, GrepTool};
pub use tool::{no_update, OnUpdate, Tool, ToolResult, ToolUpdate};

use std::path::Path;

/// Registry preloaded with every built-in tool, rooted at `cwd`.
pub fn builtin_registry(cwd: &Path) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(BashTool::new(cwd));
    reg.register(ReadFileTool::new(cwd));
    reg.register(WriteFileTool::new(cwd));
    reg.register(EditFileTool::new(cwd));
    reg.register(GlobTool::new(cwd));
    reg.register(GrepTool::new(cwd));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_expected_tools() {
        let reg = builtin_registry(Path::new("/tmp"));
        let names = reg.names();
        for expected in ["bash", "read_file", "write_file", "edit_file", "glob", "grep"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
