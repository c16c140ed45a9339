// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tool::{OnUpdate, Tool, ToolResult, ToolUpdate};

/// Visible-output budget: the model sees at most this many trailing lines.
const MAX_VISIBLE_LINES: usize = 250;

/// Visible-output budget in bytes (50 KB ≈ 12,500 tokens).
const MAX_VISIBLE_BYTES: usize = 50_000;

/// Grace window between SIGTERM and SIGKILL when cancelling.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Decides whether a command needs a real terminal.
pub type InteractivePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Executor that owns the terminal for interactive commands (vim, top, ...).
/// Injected by the frontend; absent in headless runs.
#[async_trait]
pub trait InteractiveExecutor: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path) -> ToolResult;
}

/// Shell command tool with streaming output, cancellation, and tail
/// truncation.  Overflowing output spills to a temp file so the full text
/// stays recoverable.
pub struct BashTool {
    shell: String,
    cwd: PathBuf,
    default_timeout_secs: u64,
    max_visible_lines: usize,
    max_visible_bytes: usize,
    interactive_predicate: Option<InteractivePredicate>,
    interactive_executor: Option<std::sync::Arc<dyn InteractiveExecutor>>,
}

impl BashTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            shell: "bash".into(),
            cwd: cwd.into(),
            default_timeout_secs: 120,
            max_visible_lines: MAX_VISIBLE_LINES,
            max_visible_bytes: MAX_VISIBLE_BYTES,
            interactive_predicate: None,
            interactive_executor: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn with_visible_budget(mut self, lines: usize, bytes: usize) -> Self {
        self.max_visible_lines = lines;
        self.max_visible_bytes = bytes;
        self
    }

    pub fn with_interactive(
        mut self,
        predicate: InteractivePredicate,
        executor: std::sync::Arc<dyn InteractiveExecutor>,
    ) -> Self {
        self.interactive_predicate = Some(predicate);
        self.interactive_executor = Some(executor);
        self
    }

    fn base_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(&self.cwd);
        // stdin from /dev/null: subprocesses must not touch the agent's
        // terminal, and isatty(0) == false short-circuits most of them.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // New session: the child leads its own process group, so the whole
        // tree can be killed with one signal, and open("/dev/tty") fails.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        cmd
    }

    async fn run_streaming(
        &self,
        tool_call_id: &str,
        command: &str,
        timeout_secs: u64,
        abort: CancellationToken,
        on_update: &OnUpdate,
    ) -> ToolResult {
        let mut cmd = self.base_command(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("spawn error: {e}")),
        };
        let pid = child.id();

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone());
        }
        drop(tx);

        let mut tail = RollingTail::new(self.max_visible_lines, self.max_visible_bytes);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        let mut outcome = Outcome::Exited(None);

        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    kill_tree(&mut child, pid).await;
                    outcome = Outcome::Aborted;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    kill_tree(&mut child, pid).await;
                    outcome = Outcome::TimedOut;
                    break;
                }
                chunk = rx.recv() => match chunk {
                    Some(bytes) => {
                        if let Err(e) = tail.push(&bytes) {
                            warn!(error = %e, "failed to spill command output");
                        }
                        on_update(ToolUpdate {
                            tool_call_id: tool_call_id.to_string(),
                            content: tail.visible().0,
                        });
                    }
                    None => {
                        // Both pipes closed; reap the child for its status.
                        outcome = Outcome::Exited(child.wait().await.ok().and_then(|s| s.code()));
                        break;
                    }
                }
            }
        }

        // Pipes may still hold buffered output after a kill.
        while let Ok(bytes) = rx.try_recv() {
            let _ = tail.push(&bytes);
        }

        let (visible, cut) = tail.visible();
        let truncated = cut || tail.spill_path().is_some();
        let mut content = String::new();
        if truncated {
            content.push_str(&tail.truncation_marker());
            content.push('\n');
        }
        content.push_str(&visible);

        let mut details = json!({
            "totalBytes": tail.total_bytes(),
            "truncated": truncated,
        });
        if let Some(path) = tail.spill_path() {
            details["spillFile"] = json!(path.display().to_string());
        }

        match outcome {
            Outcome::Aborted => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str("[aborted: process tree killed]");
                details["aborted"] = json!(true);
                ToolResult::error(content).with_details(details)
            }
            Outcome::TimedOut => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&format!("[timeout after {timeout_secs}s: process tree killed]"));
                details["timedOut"] = json!(true);
                ToolResult::error(content).with_details(details)
            }
            Outcome::Exited(code) => {
                let code = code.unwrap_or(-1);
                details["exitCode"] = json!(code);
                if code == 0 {
                    ToolResult::ok(content).with_details(details)
                } else {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&format!("[exit {code}]"));
                    ToolResult::error(content).with_details(details)
                }
            }
        }
    }

    /// Start a command in the background: output is redirected to a log file
    /// by the shell *before* backgrounding, so the detached process never
    /// holds our pipes open.  Returns `{ pid, logFile }` immediately.
    async fn run_background(&self, command: &str) -> ToolResult {
        let log_path = match tempfile::Builder::new()
            .prefix("arne-bg-")
            .suffix(".log")
            .tempfile()
            .and_then(|f| f.keep().map_err(|e| e.error))
        {
            Ok((_file, path)) => path,
            Err(e) => return ToolResult::error(format!("cannot create log file: {e}")),
        };

        let wrapped = format!(
            "{{ {command} ; }} > {} 2>&1 & echo $!",
            shell_quote(&log_path.display().to_string())
        );
        let mut cmd = self.base_command(&wrapped);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let output = match cmd.output().await {
            Ok(o) => o,
            Err(e) => return ToolResult::error(format!("spawn error: {e}")),
        };
        let pid: Option<u32> = String::from_utf8_lossy(&output.stdout).trim().parse().ok();
        match pid {
            Some(pid) => ToolResult::ok(format!(
                "started in background: pid {pid}, log {}",
                log_path.display()
            ))
            .with_details(json!({ "pid": pid, "logFile": log_path.display().to_string() })),
            None => ToolResult::error("background start failed: no pid captured"),
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn label(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the session working directory and return \
         stdout + stderr.\n\
         Output is truncated to the trailing portion when large; the full \
         output is kept in a temp file named in the result details.\n\
         Set background=true for long-running servers; the call returns \
         { pid, logFile } immediately.\n\
         Prefer non-interactive commands; avoid commands that require a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)."
                },
                "background": {
                    "type": "boolean",
                    "description": "Run detached; returns pid and log file immediately."
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        tool_call_id: &str,
        args: &Value,
        abort: CancellationToken,
        on_update: &OnUpdate,
    ) -> ToolResult {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter 'command'");
        };
        let timeout_secs = args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout_secs);
        let background = args.get("background").and_then(Value::as_bool).unwrap_or(false);

        debug!(cmd = %command, background, "executing bash tool");

        if background {
            return self.run_background(command).await;
        }
        if let (Some(pred), Some(exec)) = (&self.interactive_predicate, &self.interactive_executor)
        {
            if pred(command) {
                return exec.run(command, &self.cwd).await;
            }
        }
        self.run_streaming(tool_call_id, command, timeout_secs, abort, on_update).await
    }
}

enum Outcome {
    Exited(Option<i32>),
    Aborted,
    TimedOut,
}

fn spawn_reader(mut src: impl AsyncReadExt + Unpin + Send + 'static, tx: mpsc::Sender<Vec<u8>>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match src.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// SIGTERM the child's process group, wait a grace period, then SIGKILL
/// whatever is left.  The group exists because the child called setsid().
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        if child.try_wait().ok().flatten().is_none() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        let _ = child.wait().await;
        return;
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ─── Rolling tail buffer ──────────────────────────────────────────────────────

/// Keeps the trailing window of a byte stream in memory; once the stream
/// outgrows the visible budget the complete output is spilled to a temp
/// file that outlives the call.
struct RollingTail {
    buf: Vec<u8>,
    total_bytes: u64,
    max_lines: usize,
    max_bytes: usize,
    spill: Option<(std::fs::File, PathBuf)>,
}

impl RollingTail {
    fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self { buf: Vec::new(), total_bytes: 0, max_lines, max_bytes, spill: None }
    }

    fn push(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        self.total_bytes += chunk.len() as u64;
        if let Some((file, _)) = &mut self.spill {
            file.write_all(chunk)?;
        }
        self.buf.extend_from_slice(chunk);

        if self.spill.is_none() && self.buf.len() > self.max_bytes {
            // First overflow: the buffer still holds everything seen so far,
            // so the spill file starts complete.
            let (mut file, path) = tempfile::Builder::new()
                .prefix("arne-bash-")
                .suffix(".out")
                .tempfile()
                .and_then(|f| f.keep().map_err(|e| std::io::Error::from(e.error)))?;
            file.write_all(&self.buf)?;
            self.spill = Some((file, path));
        }

        // Bound the working set; cut on a line boundary so the visible tail
        // never starts mid-line.
        if self.buf.len() > self.max_bytes * 2 {
            let cut_from = self.buf.len() - self.max_bytes;
            let cut = self.buf[cut_from..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| cut_from + p + 1)
                .unwrap_or(cut_from);
            self.buf.drain(..cut);
        }
        Ok(())
    }

    /// Current visible tail and whether anything above it was cut away.
    fn visible(&self) -> (String, bool) {
        let text = String::from_utf8_lossy(&self.buf);
        let (tail, cut) = tail_slice(&text, self.max_lines, self.max_bytes);
        (tail.to_string(), cut || (self.buf.len() as u64) < self.total_bytes)
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn spill_path(&self) -> Option<&Path> {
        self.spill.as_ref().map(|(_, p)| p.as_path())
    }

    fn truncation_marker(&self) -> String {
        match self.spill_path() {
            Some(path) => format!(
                "[output truncated: showing tail of {} total bytes; full output: {}]",
                self.total_bytes,
                path.display()
            ),
            None => format!("[output truncated: showing tail of {} total bytes]", self.total_bytes),
        }
    }
}

/// Trailing slice of `s` within the line and byte budgets.
///
/// Whole lines are kept, newest first; when even the final line alone is
/// over the byte budget it is cut mid-line.  Returns the slice and whether
/// anything was dropped.
pub(crate) fn tail_slice(s: &str, max_lines: usize, max_bytes: usize) -> (&str, bool) {
    if s.len() <= max_bytes && s.split_inclusive('\n').count() <= max_lines {
        return (s, false);
    }
    let mut kept_lines = 0usize;
    let mut kept_bytes = 0usize;
    let mut start = s.len();
    for seg in s.split_inclusive('\n').rev() {
        if kept_bytes + seg.len() > max_bytes || kept_lines + 1 > max_lines {
            break;
        }
        kept_bytes += seg.len();
        kept_lines += 1;
        start -= seg.len();
    }
    if kept_lines == 0 {
        // A single line larger than the budget: cut inside it.
        let mut cut = s.len() - max_bytes;
        while !s.is_char_boundary(cut) {
            cut += 1;
        }
        return (&s[cut..], true);
    }
    (&s[start..], start > 0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
