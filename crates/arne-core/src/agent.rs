// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use arne_log::{EntryPayload, LogError, SessionLog};
use arne_model::{
    cost_for, lookup, sanitize::sanitize_outgoing, AssistantMessage, CompletionOptions,
    CompletionRequest, Message, MessageAccumulator, Provider, StopReason, StreamEvent,
    ThinkingLevel, ToolResultMessage, TransportError, Usage,
};
use arne_tools::{OnUpdate, ToolRegistry, ToolResult, ToolUpdate};

use crate::bus::EventBus;
use crate::compact::{
    choose_first_kept, messages_to_summarize, should_compact, summarize_request_text,
    DEFAULT_RESERVE_TOKENS,
};
use crate::context::{apply_transform_ops, build_envelope, Envelope};
use crate::events::{AgentEvent, LoopState};
use crate::queue::{QueueKind, UserQueues};

/// Hook fired before every model request.  A returned op list is persisted
/// as a `context_transform` entry and applied to the outgoing envelope.
pub type BeforeRequestHook = Box<dyn Fn(&Envelope) -> Option<Vec<Value>> + Send + Sync>;

/// Cancels the in-flight turn from outside the loop task.
#[derive(Clone)]
pub struct AbortHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.lock().unwrap().cancel();
    }
}

/// Enqueues steering / follow-up messages from outside the loop task.
/// Every mutation emits `queue_changed` so frontends reconcile against the
/// authoritative queue state, including after a lost race with the drain.
#[derive(Clone)]
pub struct QueueHandle {
    queues: Arc<Mutex<UserQueues>>,
    bus: EventBus,
}

impl QueueHandle {
    pub fn steer(&self, text: impl Into<String>) -> i64 {
        self.push(QueueKind::Steering, text)
    }

    pub fn follow_up(&self, text: impl Into<String>) -> i64 {
        self.push(QueueKind::FollowUp, text)
    }

    fn push(&self, kind: QueueKind, text: impl Into<String>) -> i64 {
        let (ts, snapshot) = {
            let mut q = self.queues.lock().unwrap();
            let ts = q.push(kind, text);
            (ts, q.peek(kind).to_vec())
        };
        self.bus.emit(&AgentEvent::QueueChanged { kind, messages: snapshot });
        ts
    }

    /// Edit a queued message by timestamp; `false` when the loop already
    /// consumed it.
    pub fn edit(&self, kind: QueueKind, timestamp: i64, text: impl Into<String>) -> bool {
        let (ok, snapshot) = {
            let mut q = self.queues.lock().unwrap();
            let ok = q.edit(kind, timestamp, text);
            (ok, q.peek(kind).to_vec())
        };
        self.bus.emit(&AgentEvent::QueueChanged { kind, messages: snapshot });
        ok
    }

    /// Remove a queued message by index; `false` when out of range.
    pub fn remove(&self, kind: QueueKind, index: usize) -> bool {
        let (ok, snapshot) = {
            let mut q = self.queues.lock().unwrap();
            let ok = q.remove_at(kind, index);
            (ok, q.peek(kind).to_vec())
        };
        self.bus.emit(&AgentEvent::QueueChanged { kind, messages: snapshot });
        ok
    }

    pub fn pending(&self, kind: QueueKind) -> Vec<crate::queue::QueuedUserMessage> {
        self.queues.lock().unwrap().peek(kind).to_vec()
    }
}

enum TurnOutcome {
    Completed,
    Aborted,
    Errored(String),
}

/// The agent: owns the session log, drives the model ↔ tool loop, and fans
/// every observable change out through the event bus.
///
/// All appends happen on this task; tool executions run as independent
/// tasks whose completions are funneled back over a channel and re-ordered
/// to the assistant's declared tool-call order before appending.
pub struct Agent {
    log: SessionLog,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    bus: EventBus,
    queues: Arc<Mutex<UserQueues>>,
    state: LoopState,
    system_prompt: String,
    thinking_level: ThinkingLevel,
    auto_compaction: bool,
    reserve_tokens: u64,
    turn_abort: Arc<Mutex<CancellationToken>>,
    before_request: Option<BeforeRequestHook>,
    /// Text of the message the user chose to fork, held until the next
    /// prompt replaces it.
    pending_fork_text: Option<String>,
}

impl Agent {
    pub fn new(log: SessionLog, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            log,
            provider,
            tools,
            bus: EventBus::new(),
            queues: Arc::new(Mutex::new(UserQueues::default())),
            state: LoopState::Idle,
            system_prompt: String::new(),
            thinking_level: ThinkingLevel::Off,
            auto_compaction: true,
            reserve_tokens: DEFAULT_RESERVE_TOKENS,
            turn_abort: Arc::new(Mutex::new(CancellationToken::new())),
            before_request: None,
            pending_fork_text: None,
        }
    }

    // ─── Wiring ───────────────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle { token: self.turn_abort.clone() }
    }

    pub fn queue_handle(&self) -> QueueHandle {
        QueueHandle { queues: self.queues.clone(), bus: self.bus.clone() }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_before_request_hook(&mut self, hook: BeforeRequestHook) {
        self.before_request = Some(hook);
    }

    pub fn set_auto_compaction(&mut self, on: bool) {
        self.auto_compaction = on;
    }

    /// How many queued messages each drain consumes (both queues).
    pub fn set_queue_mode(&mut self, mode: crate::queue::DrainMode) {
        self.queues.lock().unwrap().set_mode(mode);
    }

    pub fn auto_compaction(&self) -> bool {
        self.auto_compaction
    }

    pub fn set_reserve_tokens(&mut self, tokens: u64) {
        self.reserve_tokens = tokens;
    }

    pub fn thinking_level(&self) -> ThinkingLevel {
        self.thinking_level
    }

    /// Change the thinking level; recorded in the log so a resumed session
    /// replays with the same setting.
    pub fn set_thinking_level(&mut self, level: ThinkingLevel) -> Result<(), LogError> {
        self.thinking_level = level;
        self.log.append(EntryPayload::ThinkingLevelChange { level })?;
        Ok(())
    }

    /// Swap the model provider; recorded in the log.
    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) -> Result<(), LogError> {
        self.log.append(EntryPayload::ModelChange {
            provider: provider.name().to_string(),
            model_id: provider.model_name().to_string(),
        })?;
        self.provider = provider;
        Ok(())
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut SessionLog {
        &mut self.log
    }

    /// Switch this agent onto another session log (new/switch session).
    /// Queues are untouched; the pending fork text is cleared.
    pub fn replace_log(&mut self, log: SessionLog) {
        self.pending_fork_text = None;
        self.log = log;
    }

    // ─── Prompting ────────────────────────────────────────────────────────────

    /// Append the user message and run turns until no tool calls remain and
    /// the follow-up queue is empty.
    pub async fn prompt(&mut self, text: &str) -> anyhow::Result<()> {
        self.pending_fork_text = None;
        self.append_message(Message::user(text))?;
        self.run_turns().await
    }

    async fn run_turns(&mut self) -> anyhow::Result<()> {
        let abort = self.fresh_abort();
        let result = loop {
            match self.run_one_turn(&abort).await {
                Ok(TurnOutcome::Completed) => {
                    if let Err(e) = self.maybe_auto_compact(&abort).await {
                        warn!(error = %e, "auto-compaction failed; continuing uncompacted");
                    }
                    let follow_ups = {
                        let mut q = self.queues.lock().unwrap();
                        q.drain(QueueKind::FollowUp)
                    };
                    if follow_ups.is_empty() {
                        break Ok(());
                    }
                    self.emit_queue_changed(QueueKind::FollowUp);
                    for m in follow_ups {
                        self.append_message(Message::user(m.text))?;
                    }
                }
                Ok(TurnOutcome::Aborted) => {
                    self.set_state(LoopState::Aborted);
                    break Ok(());
                }
                Ok(TurnOutcome::Errored(message)) => {
                    self.bus.emit(&AgentEvent::Error { message: message.clone() });
                    self.set_state(LoopState::Errored);
                    break Ok(());
                }
                // Log I/O failure: halt rather than diverge from disk.
                Err(e) => {
                    self.bus.emit(&AgentEvent::Error { message: e.to_string() });
                    self.set_state(LoopState::Errored);
                    break Err(e);
                }
            }
        };
        self.set_state(LoopState::Idle);
        result
    }

    /// One turn: steering drain, context build, one streamed response, then
    /// tool rounds until the model stops asking for tools.
    async fn run_one_turn(&mut self, abort: &CancellationToken) -> anyhow::Result<TurnOutcome> {
        loop {
            let steering = {
                let mut q = self.queues.lock().unwrap();
                q.drain(QueueKind::Steering)
            };
            if !steering.is_empty() {
                self.emit_queue_changed(QueueKind::Steering);
                for m in steering {
                    self.append_message(Message::user(m.text))?;
                }
            }

            self.set_state(LoopState::PreparingRequest);
            let mut envelope =
                build_envelope(&self.log.branch(), &self.system_prompt, self.tools.schemas());
            if let Some(hook) = &self.before_request {
                if let Some(ops) = hook(&envelope) {
                    self.log.append(EntryPayload::ContextTransform { ops: ops.clone() })?;
                    apply_transform_ops(&mut envelope.messages, &ops);
                }
            }

            self.set_state(LoopState::Streaming);
            let message = self.stream_once(envelope, abort).await;
            let stop_reason = message.stop_reason;
            let error_message = message.error_message.clone();
            self.append_message(Message::Assistant(message.clone()))?;
            self.bus.emit(&AgentEvent::MessageEnd { message: Message::Assistant(message.clone()) });

            match stop_reason {
                StopReason::ToolUse => {
                    let aborted = self.execute_tools(&message, abort).await?;
                    if aborted {
                        self.append_aborted_marker()?;
                        return Ok(TurnOutcome::Aborted);
                    }
                }
                StopReason::Stop | StopReason::Length => return Ok(TurnOutcome::Completed),
                StopReason::Aborted => return Ok(TurnOutcome::Aborted),
                StopReason::Error => {
                    return Ok(TurnOutcome::Errored(
                        error_message.unwrap_or_else(|| "model request failed".into()),
                    ))
                }
            }
        }
    }

    /// Drive one provider stream to its terminal event, mutating the
    /// in-progress assistant message in place and forwarding every event.
    /// Always returns a finalized message; failures are encoded in its
    /// stop reason rather than thrown.
    async fn stream_once(&mut self, envelope: Envelope, abort: &CancellationToken) -> AssistantMessage {
        let request = CompletionRequest {
            messages: sanitize_outgoing(envelope.messages, self.provider.supports_images()),
            system_prompt: envelope.system_prompt,
            tools: envelope.tools,
            options: CompletionOptions {
                thinking_budget: if self.provider.supports_thinking() {
                    self.thinking_level.budget_tokens()
                } else {
                    None
                },
                abort: abort.child_token(),
                ..Default::default()
            },
        };

        let started =
            AssistantMessage::started(self.provider.name(), self.provider.model_name(), self.provider.api());
        let mut acc = MessageAccumulator::new(started);

        let mut stream = match self.provider.stream(request).await {
            Ok(s) => s,
            Err(e) => {
                let mut message = acc.finish();
                if is_abort_error(&e) || abort.is_cancelled() {
                    message.stop_reason = StopReason::Aborted;
                } else {
                    message.stop_reason = StopReason::Error;
                    message.error_message = Some(e.to_string());
                }
                return message;
            }
        };

        let mut aborted = false;
        let mut stream_error: Option<String> = None;
        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    aborted = true;
                    break;
                }
                item = stream.next() => match item {
                    None => break,
                    Some(Ok(event)) => {
                        if let StreamEvent::Start { message } = &event {
                            self.bus.emit(&AgentEvent::MessageStart {
                                message: Message::Assistant(message.clone()),
                            });
                        }
                        acc.apply(&event);
                        let terminal = event.is_terminal();
                        if !matches!(event, StreamEvent::Start { .. }) && !terminal {
                            self.bus.emit(&AgentEvent::MessageUpdate { event });
                        }
                        if terminal {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        if is_abort_error(&e) {
                            aborted = true;
                        } else {
                            stream_error = Some(e.to_string());
                        }
                        break;
                    }
                }
            }
        }

        let mut message = acc.finish();
        if aborted {
            message.stop_reason = StopReason::Aborted;
        } else if let Some(err) = stream_error {
            message.stop_reason = StopReason::Error;
            message.error_message = Some(err);
        }
        self.fill_cost(&mut message.usage);
        message
    }

    fn fill_cost(&self, usage: &mut Usage) {
        if let Some(entry) = lookup(self.provider.name(), self.provider.model_name()) {
            usage.cost = cost_for(entry, usage);
        }
    }

    // ─── Tool execution ───────────────────────────────────────────────────────

    /// Run every tool call concurrently; append results in the declared
    /// order regardless of completion order.  Returns whether the user
    /// aborted mid-execution.
    async fn execute_tools(
        &mut self,
        assistant: &AssistantMessage,
        abort: &CancellationToken,
    ) -> anyhow::Result<bool> {
        self.set_state(LoopState::ExecutingTools);
        let calls: Vec<(String, String, Value)> = assistant
            .tool_calls()
            .into_iter()
            .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
            .collect();

        for (id, name, args) in &calls {
            self.bus.emit(&AgentEvent::ToolExecutionStart {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                args: args.clone(),
            });
        }

        enum ToolMsg {
            Update(ToolUpdate),
            Done(usize, ToolResult),
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ToolMsg>();
        for (i, (id, name, args)) in calls.iter().cloned().enumerate() {
            let registry = Arc::clone(&self.tools);
            let tool_abort = abort.child_token();
            let tx = tx.clone();
            tokio::spawn(async move {
                let update_tx = tx.clone();
                let on_update: OnUpdate = Box::new(move |u| {
                    let _ = update_tx.send(ToolMsg::Update(u));
                });
                let result = registry.execute(&id, &name, &args, tool_abort, &on_update).await;
                let _ = tx.send(ToolMsg::Done(i, result));
            });
        }
        drop(tx);

        let name_of = |id: &str| {
            calls
                .iter()
                .find(|(cid, ..)| cid == id)
                .map(|(_, n, _)| n.clone())
                .unwrap_or_default()
        };

        // Completions can land out of order; buffer and append in the
        // assistant's declared order.
        let mut buffered: BTreeMap<usize, ToolResult> = BTreeMap::new();
        let mut next_to_append = 0usize;
        while let Some(msg) = rx.recv().await {
            match msg {
                ToolMsg::Update(u) => {
                    self.bus.emit(&AgentEvent::ToolExecutionUpdate {
                        tool_name: name_of(&u.tool_call_id),
                        tool_call_id: u.tool_call_id,
                        partial: u.content,
                    });
                }
                ToolMsg::Done(i, result) => {
                    buffered.insert(i, result);
                    while let Some(result) = buffered.remove(&next_to_append) {
                        self.append_tool_result(&calls[next_to_append], result)?;
                        next_to_append += 1;
                    }
                }
            }
        }
        // A panicked task never reports; synthesize an error result so every
        // tool call stays matched by a tool result.
        while next_to_append < calls.len() {
            let result = buffered
                .remove(&next_to_append)
                .unwrap_or_else(|| ToolResult::error("tool execution failed unexpectedly"));
            self.append_tool_result(&calls[next_to_append], result)?;
            next_to_append += 1;
        }

        Ok(abort.is_cancelled())
    }

    fn append_tool_result(
        &mut self,
        call: &(String, String, Value),
        result: ToolResult,
    ) -> anyhow::Result<()> {
        let (id, name, _) = call;
        let message = ToolResultMessage {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            content: result.content,
            is_error: result.is_error,
            details: result.details,
            timestamp: arne_model::now_millis(),
        };
        self.append_message(Message::ToolResult(message.clone()))?;
        self.bus.emit(&AgentEvent::ToolExecutionEnd {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            is_error: message.is_error,
            result: message,
        });
        Ok(())
    }

    /// Close an aborted turn so the log records why no further entries
    /// follow the tool results.
    fn append_aborted_marker(&mut self) -> anyhow::Result<()> {
        let mut marker =
            AssistantMessage::started(self.provider.name(), self.provider.model_name(), self.provider.api());
        marker.stop_reason = StopReason::Aborted;
        self.append_message(Message::Assistant(marker.clone()))?;
        self.bus.emit(&AgentEvent::MessageEnd { message: Message::Assistant(marker) });
        Ok(())
    }

    // ─── Compaction ───────────────────────────────────────────────────────────

    async fn maybe_auto_compact(&mut self, abort: &CancellationToken) -> anyhow::Result<()> {
        if !self.auto_compaction {
            return Ok(());
        }
        let Some(window) = self.provider.context_window() else { return Ok(()) };
        let branch = self.log.branch();
        let last_usage = branch.iter().rev().find_map(|e| match e.message() {
            Some(Message::Assistant(a))
                if a.usage.total_tokens > 0
                    && !matches!(a.stop_reason, StopReason::Aborted | StopReason::Error) =>
            {
                Some((e.id.clone(), a.usage.clone()))
            }
            _ => None,
        });
        let Some((usage_entry, usage)) = last_usage else { return Ok(()) };
        let added: u64 = branch
            .iter()
            .skip_while(|e| e.id != usage_entry)
            .skip(1)
            .filter_map(|e| e.message())
            .map(|m| m.approx_tokens())
            .sum();
        if should_compact(Some(&usage), added, window as u64, self.reserve_tokens) {
            self.compact(None, abort).await?;
        }
        Ok(())
    }

    /// Run one dedicated summarization call and record the boundary.
    pub async fn compact(
        &mut self,
        custom_instructions: Option<&str>,
        abort: &CancellationToken,
    ) -> anyhow::Result<()> {
        let branch = self.log.branch();
        let Some(first_kept) = choose_first_kept(&branch) else {
            anyhow::bail!("not enough history to compact");
        };
        self.set_state(LoopState::Compacting);
        self.bus.emit(&AgentEvent::CompactionStarted);

        let to_summarize = messages_to_summarize(&branch, &first_kept);
        let tokens_before: u64 =
            branch.iter().filter_map(|e| e.message()).map(|m| m.approx_tokens()).sum();

        let request = CompletionRequest {
            messages: vec![Message::user(summarize_request_text(
                &to_summarize,
                custom_instructions,
            ))],
            system_prompt: String::new(),
            tools: Vec::new(),
            options: CompletionOptions { abort: abort.child_token(), ..Default::default() },
        };

        let summary = self.collect_text(request).await?;
        if summary.trim().is_empty() {
            anyhow::bail!("compaction produced an empty summary");
        }

        self.log.append(EntryPayload::Compaction {
            summary: summary.clone(),
            first_kept_entry_id: first_kept.clone(),
            tokens_before,
        })?;
        self.bus.emit(&AgentEvent::CompactionFinished {
            summary,
            first_kept_entry_id: first_kept,
            tokens_before,
        });
        Ok(())
    }

    /// Run a tool-free request to completion and return its text.  Used for
    /// compaction and branch summaries; emits no message events.
    async fn collect_text(&mut self, request: CompletionRequest) -> anyhow::Result<String> {
        let mut stream = self.provider.stream(request).await?;
        let started =
            AssistantMessage::started(self.provider.name(), self.provider.model_name(), self.provider.api());
        let mut acc = MessageAccumulator::new(started);
        while let Some(item) = stream.next().await {
            let event = item?;
            acc.apply(&event);
            if event.is_terminal() {
                break;
            }
        }
        Ok(acc.finish().text())
    }

    // ─── Fork / navigate ──────────────────────────────────────────────────────

    /// Start a new branch at `entry_id` (a user message): the leaf moves to
    /// its parent and the message text is returned for the frontend to
    /// pre-fill.  History is never erased; the old branch stays in the tree.
    pub fn fork(&mut self, entry_id: &str) -> anyhow::Result<String> {
        let entry = self
            .log
            .entry(entry_id)
            .ok_or_else(|| anyhow::anyhow!("unknown entry: {entry_id}"))?;
        let Some(Message::User(user)) = entry.message() else {
            anyhow::bail!("fork target must be a user message");
        };
        let text = user.content.as_text().unwrap_or_default().to_string();
        match entry.parent_id.clone() {
            Some(parent) => self.log.set_leaf(&parent)?,
            None => self.log.reset_leaf(),
        }
        self.pending_fork_text = Some(text.clone());
        Ok(text)
    }

    /// The user messages on the current branch, oldest first, for fork
    /// target selection.
    pub fn fork_messages(&self) -> Vec<(String, String)> {
        self.log
            .branch()
            .iter()
            .filter_map(|e| match e.message() {
                Some(Message::User(u)) => {
                    Some((e.id.clone(), u.content.as_text().unwrap_or_default().to_string()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn pending_fork_text(&self) -> Option<&str> {
        self.pending_fork_text.as_deref()
    }

    /// Move the leaf anywhere in the tree.  With `summarize`, the branch
    /// being left is summarized by a dedicated model call and the summary
    /// appended on the new branch.
    pub async fn navigate_tree(&mut self, target_id: &str, summarize: bool) -> anyhow::Result<()> {
        let summary = if summarize {
            let leaving = self.log.branch();
            let messages: Vec<Message> =
                leaving.iter().filter_map(|e| e.message().cloned()).collect();
            let request = CompletionRequest {
                messages: vec![Message::user(summarize_request_text(&messages, Some(
                    "This is a branch the user is navigating away from; keep it short.",
                )))],
                ..Default::default()
            };
            match self.collect_text(request).await {
                Ok(s) if !s.trim().is_empty() => Some(s),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "branch summary failed; navigating without one");
                    None
                }
            }
        } else {
            None
        };

        self.log.set_leaf(target_id)?;
        if let Some(summary) = summary {
            self.append_message(Message::BranchSummary(arne_model::BranchSummaryMessage {
                summary,
                timestamp: arne_model::now_millis(),
            }))?;
        }
        Ok(())
    }

    /// Most recent assistant text on the current branch.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.log.branch().iter().rev().find_map(|e| match e.message() {
            Some(Message::Assistant(a)) if !a.text().is_empty() => Some(a.text()),
            _ => None,
        })
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    fn append_message(&mut self, message: Message) -> Result<String, LogError> {
        self.log.append(EntryPayload::Message { message })
    }

    fn fresh_abort(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.turn_abort.lock().unwrap() = token.clone();
        token
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            self.state = state;
            self.bus.emit(&AgentEvent::StateChanged { state });
        }
    }

    fn emit_queue_changed(&self, kind: QueueKind) {
        let snapshot = self.queues.lock().unwrap().peek(kind).to_vec();
        self.bus.emit(&AgentEvent::QueueChanged { kind, messages: snapshot });
    }
}

fn is_abort_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<TransportError>(), Some(TransportError::Aborted))
}
