// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Transport-agnostic control surface.
//!
//! Frontends (terminal UI, headless JSON-RPC) talk to one session through
//! [`Command`] / [`Response`]: every command yields a response, and streaming
//! output arrives separately through the event bus.  Failures are responses
//! with `success = false`, never panics.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use arne_log::{EntryPayload, SessionLog, TreeNode};
use arne_model::{next_model, Message, Provider, ThinkingLevel};
use arne_tools::{no_update, BashTool, Tool};

use crate::agent::Agent;
use crate::queue::QueueKind;
use crate::stats::session_stats;

/// Builds a provider for `(provider_id, model_id)`.  Injected so the
/// control surface stays independent of concrete provider wiring.
pub type ProviderFactory =
    Box<dyn Fn(&str, &str) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;

/// One command against a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Prompt { text: String },
    Steer { text: String },
    FollowUp { text: String },
    Abort,
    NewSession { parent_session: Option<PathBuf> },
    GetState,
    SetModel { provider: String, model_id: String },
    CycleModel,
    SetThinkingLevel { level: ThinkingLevel },
    Compact { custom_instructions: Option<String> },
    SetAutoCompaction { enabled: bool },
    Bash { command: String },
    AbortBash,
    GetSessionStats,
    SwitchSession { path: PathBuf },
    Fork { entry_id: String },
    GetForkMessages,
    GetLastAssistantText,
    SetSessionName { name: String },
    ListSessions {
        #[serde(default)]
        all: bool,
        #[serde(default)]
        include_search_text: bool,
    },
    RenameSession { path: PathBuf, name: String },
    DeleteSession { path: PathBuf },
    GetMessages,
    GetTree {
        #[serde(default)]
        include_content: bool,
    },
    NavigateTree {
        target_id: String,
        #[serde(default)]
        summarize: bool,
    },
    SetLabel { entry_id: String, label: Option<String> },
}

/// The uniform reply shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn ok_empty() -> Self {
        Self { success: true, data: None, error: None }
    }

    fn err(e: impl std::fmt::Display) -> Self {
        Self { success: false, data: None, error: Some(e.to_string()) }
    }
}

/// Owns one [`Agent`] and executes commands against it.
pub struct Controller {
    agent: Agent,
    sessions_dir: PathBuf,
    cwd: PathBuf,
    provider_factory: ProviderFactory,
    bash_abort: CancellationToken,
}

impl Controller {
    pub fn new(
        agent: Agent,
        cwd: PathBuf,
        sessions_dir: PathBuf,
        provider_factory: ProviderFactory,
    ) -> Self {
        Self {
            agent,
            sessions_dir,
            cwd,
            provider_factory,
            bash_abort: CancellationToken::new(),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    /// Execute one command.  Never fails: errors become `success = false`.
    pub async fn dispatch(&mut self, command: Command) -> Response {
        match command {
            Command::Prompt { text } => match self.agent.prompt(&text).await {
                Ok(()) => Response::ok_empty(),
                Err(e) => Response::err(e),
            },
            Command::Steer { text } => {
                let ts = self.agent.queue_handle().steer(text);
                Response::ok(json!({ "timestamp": ts }))
            }
            Command::FollowUp { text } => {
                let ts = self.agent.queue_handle().follow_up(text);
                Response::ok(json!({ "timestamp": ts }))
            }
            Command::Abort => {
                self.agent.abort_handle().abort();
                Response::ok_empty()
            }
            Command::NewSession { parent_session } => match self.new_session(parent_session) {
                Ok(id) => Response::ok(json!({ "sessionId": id })),
                Err(e) => Response::err(e),
            },
            Command::GetState => Response::ok(self.state_snapshot()),
            Command::SetModel { provider, model_id } => {
                match (self.provider_factory)(&provider, &model_id)
                    .and_then(|p| Ok(self.agent.set_provider(p)?))
                {
                    Ok(()) => Response::ok_empty(),
                    Err(e) => Response::err(e),
                }
            }
            Command::CycleModel => {
                let current = self.agent.provider();
                let next = next_model(current.name(), current.model_name());
                match (self.provider_factory)(next.provider, next.id)
                    .and_then(|p| Ok(self.agent.set_provider(p)?))
                {
                    Ok(()) => Response::ok(json!({ "provider": next.provider, "modelId": next.id })),
                    Err(e) => Response::err(e),
                }
            }
            Command::SetThinkingLevel { level } => match self.agent.set_thinking_level(level) {
                Ok(()) => Response::ok_empty(),
                Err(e) => Response::err(e),
            },
            Command::Compact { custom_instructions } => {
                let abort = CancellationToken::new();
                match self.agent.compact(custom_instructions.as_deref(), &abort).await {
                    Ok(()) => Response::ok_empty(),
                    Err(e) => Response::err(e),
                }
            }
            Command::SetAutoCompaction { enabled } => {
                self.agent.set_auto_compaction(enabled);
                Response::ok_empty()
            }
            Command::Bash { command } => self.run_bash(&command).await,
            Command::AbortBash => {
                self.bash_abort.cancel();
                Response::ok_empty()
            }
            Command::GetSessionStats => match serde_json::to_value(session_stats(self.agent.log()))
            {
                Ok(v) => Response::ok(v),
                Err(e) => Response::err(e),
            },
            Command::SwitchSession { path } => match SessionLog::open(&path) {
                Ok(log) => {
                    self.agent.replace_log(log);
                    Response::ok_empty()
                }
                Err(e) => Response::err(e),
            },
            Command::Fork { entry_id } => match self.agent.fork(&entry_id) {
                Ok(text) => Response::ok(json!({ "text": text })),
                Err(e) => Response::err(e),
            },
            Command::GetForkMessages => {
                let msgs: Vec<Value> = self
                    .agent
                    .fork_messages()
                    .into_iter()
                    .map(|(id, text)| json!({ "entryId": id, "text": text }))
                    .collect();
                Response::ok(json!(msgs))
            }
            Command::GetLastAssistantText => {
                Response::ok(json!({ "text": self.agent.last_assistant_text() }))
            }
            Command::SetSessionName { name } => {
                match self.agent.log_mut().append(EntryPayload::SessionInfo { name }) {
                    Ok(_) => Response::ok_empty(),
                    Err(e) => Response::err(e),
                }
            }
            Command::ListSessions { all, include_search_text } => {
                let result = if all {
                    arne_log::list_all(&self.sessions_dir, include_search_text)
                } else {
                    arne_log::list(
                        &self.sessions_dir,
                        &self.cwd.to_string_lossy(),
                        include_search_text,
                    )
                };
                match result {
                    Ok(sessions) => match serde_json::to_value(sessions) {
                        Ok(v) => Response::ok(v),
                        Err(e) => Response::err(e),
                    },
                    Err(e) => Response::err(e),
                }
            }
            Command::RenameSession { path, name } => match arne_log::rename(&path, &name) {
                Ok(()) => Response::ok_empty(),
                Err(e) => Response::err(e),
            },
            Command::DeleteSession { path } => match arne_log::delete(&path) {
                Ok(()) => Response::ok_empty(),
                Err(e) => Response::err(e),
            },
            Command::GetMessages => {
                let branch = self.agent.log().branch();
                let messages: Vec<Message> =
                    branch.iter().filter_map(|e| e.message().cloned()).collect();
                match serde_json::to_value(messages) {
                    Ok(v) => Response::ok(v),
                    Err(e) => Response::err(e),
                }
            }
            Command::GetTree { include_content } => {
                let tree = self.agent.log().tree();
                let nodes: Vec<Value> =
                    tree.iter().map(|n| tree_node_json(n, include_content)).collect();
                Response::ok(json!(nodes))
            }
            Command::NavigateTree { target_id, summarize } => {
                match self.agent.navigate_tree(&target_id, summarize).await {
                    Ok(()) => Response::ok_empty(),
                    Err(e) => Response::err(e),
                }
            }
            Command::SetLabel { entry_id, label } => {
                if self.agent.log().entry(&entry_id).is_none() {
                    return Response::err(format!("unknown entry: {entry_id}"));
                }
                match self
                    .agent
                    .log_mut()
                    .append(EntryPayload::Label { target_id: entry_id, label })
                {
                    Ok(_) => Response::ok_empty(),
                    Err(e) => Response::err(e),
                }
            }
        }
    }

    fn state_snapshot(&self) -> Value {
        let provider = self.agent.provider();
        let qh = self.agent.queue_handle();
        json!({
            "state": self.agent.state(),
            "sessionId": self.agent.log().session_id(),
            "provider": provider.name(),
            "modelId": provider.model_name(),
            "thinkingLevel": self.agent.thinking_level(),
            "autoCompaction": self.agent.auto_compaction(),
            "steeringQueue": qh.pending(QueueKind::Steering),
            "followUpQueue": qh.pending(QueueKind::FollowUp),
            "pendingForkText": self.agent.pending_fork_text(),
        })
    }

    fn new_session(&mut self, parent: Option<PathBuf>) -> anyhow::Result<String> {
        let log = match parent {
            Some(path) => {
                let source = SessionLog::open(&path)?;
                let leaf = source
                    .leaf_id()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("parent session is empty"))?;
                source.fork_from(&leaf, &self.sessions_dir)?
            }
            None => SessionLog::create(self.cwd.to_string_lossy(), &self.sessions_dir)?,
        };
        let id = log.session_id().to_string();
        self.agent.replace_log(log);
        Ok(id)
    }

    /// Run a user-invoked shell command outside the model loop and record
    /// it so the model sees what happened.
    async fn run_bash(&mut self, command: &str) -> Response {
        self.bash_abort = CancellationToken::new();
        let tool = BashTool::new(self.cwd.clone());
        let result = tool
            .execute("user-bash", &json!({ "command": command }), self.bash_abort.clone(), &no_update())
            .await;
        let output = result.text();
        let exit_code = result
            .details
            .as_ref()
            .and_then(|d| d.get("exitCode"))
            .and_then(Value::as_i64)
            .map(|c| c as i32);
        let appended = self.agent.log_mut().append(EntryPayload::Message {
            message: Message::BashExecution(arne_model::BashExecutionMessage {
                command: command.to_string(),
                output: output.clone(),
                exit_code,
                timestamp: arne_model::now_millis(),
            }),
        });
        match appended {
            Ok(_) => Response::ok(json!({ "output": output, "exitCode": exit_code, "isError": result.is_error })),
            Err(e) => Response::err(e),
        }
    }
}

fn tree_node_json(node: &TreeNode, include_content: bool) -> Value {
    let mut v = json!({
        "id": node.entry.id,
        "parentId": node.entry.parent_id,
        "label": node.label,
        "children": node.children.iter().map(|c| tree_node_json(c, include_content)).collect::<Vec<_>>(),
    });
    if include_content {
        v["entry"] = serde_json::to_value(&node.entry).unwrap_or(Value::Null);
    } else if let Some(m) = node.entry.message() {
        v["role"] = json!(message_role(m));
    }
    v
}

fn message_role(m: &Message) -> &'static str {
    match m {
        Message::User(_) => "user",
        Message::Assistant(_) => "assistant",
        Message::ToolResult(_) => "toolResult",
        Message::BashExecution(_) => "bashExecution",
        Message::BranchSummary(_) => "branchSummary",
        Message::CompactionSummary(_) => "compactionSummary",
        Message::Custom(_) => "custom",
    }
}
