// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-call scheduler: per-resource serialization, cross-resource
//! parallelism.
//!
//! A batch from one assistant response is partitioned by resource id:
//!
//! | tool | resource |
//! |---|---|
//! | `todo-*` | `todo-state` |
//! | `terminal-execute` | `terminal-execution` |
//! | `filesystem-edit(_search)` with one path P | `filesystem:P` |
//! | `filesystem-edit(_search)` with a path array | `filesystem-batch:<call-id>` |
//! | everything else | `independent:<call-id>` |
//!
//! Calls sharing a partition run sequentially in array order; partitions run
//! in parallel.  Results are reassembled into the original order before the
//! loop sees them.  Approval, sensitive-command flagging, ESC interruption
//! of terminal commands, and hook-abort skip semantics all live here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use snow_config::{McpServerConfig, SensitiveCommandsStore};
use snow_model::ToolCallRecord;
use snow_tools::{file_paths_of, DispatchError, HookReport, ToolCall, ToolOutput, ToolRegistry, UserQuestion};

use crate::approval::ApprovalState;

/// Decision returned by the confirmation callback.
#[derive(Debug, Clone)]
pub enum ConfirmationDecision {
    Approve,
    /// Approve and add the tool to the always-approved sets.
    ApproveAlways,
    Reject,
    /// Reject; the model receives `0` as the tool's error message.
    RejectWithReply(String),
}

/// Sent to the UI when a tool needs confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub call: ToolCallRecord,
    /// The other tools in this batch, for context.
    pub siblings: Vec<String>,
    /// Matched a sensitive-command pattern (terminal commands only).
    pub is_sensitive: bool,
}

/// UI-side callbacks the scheduler blocks on.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn confirm_tool(&self, request: ConfirmationRequest) -> ConfirmationDecision;
    /// Forward an `askuser` question; `None` means the user cancelled.
    async fn ask_user(&self, question: UserQuestion) -> Option<String>;
}

/// Outcome of one batch.
pub struct BatchOutcome {
    /// One output per call, in the originating `tool_calls` order.
    pub outputs: Vec<ToolOutput>,
    /// Set when any hook aborted; the turn halts after this batch.
    pub hook_failure: Option<HookReport>,
    /// Paths the batch may have written, for snapshotting.
    pub touched_paths: Vec<String>,
}

/// Resource identifier for a call, per the partition table.
pub fn resource_id(call: &ToolCall) -> String {
    if call.name.starts_with("todo-") {
        return "todo-state".to_string();
    }
    if call.name == "terminal-execute" {
        return "terminal-execution".to_string();
    }
    if call.name == "filesystem-edit" || call.name == "filesystem-edit_search" {
        let paths = file_paths_of(&call.args);
        if paths.len() == 1 {
            return format!("filesystem:{}", paths[0]);
        }
        if paths.len() > 1 {
            return format!("filesystem-batch:{}", call.id);
        }
    }
    format!("independent:{}", call.id)
}

/// Tools whose arguments name files they write.
fn writes_files(name: &str) -> bool {
    matches!(
        name,
        "filesystem-write" | "filesystem-edit" | "filesystem-edit_search"
    )
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    approvals: Arc<ApprovalState>,
    sensitive: Arc<SensitiveCommandsStore>,
    interaction: Arc<dyn InteractionHandler>,
    /// Arm the raw-mode ESC watcher during terminal commands (only when
    /// stdin is a TTY; the SSE surface cancels via the turn token instead).
    esc_interrupt: bool,
}

impl ToolScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        approvals: Arc<ApprovalState>,
        sensitive: Arc<SensitiveCommandsStore>,
        interaction: Arc<dyn InteractionHandler>,
    ) -> Self {
        Self {
            registry,
            approvals,
            sensitive,
            interaction,
            esc_interrupt: true,
        }
    }

    pub fn with_esc_interrupt(mut self, enabled: bool) -> Self {
        self.esc_interrupt = enabled;
        self
    }

    /// Run one batch of calls.
    ///
    /// `local_approvals` is the sub-agent-scoped extra layer; `None` for the
    /// main loop.
    pub async fn run_batch(
        self: &Arc<Self>,
        records: &[ToolCallRecord],
        mcp_config: Arc<HashMap<String, McpServerConfig>>,
        local_approvals: Option<Arc<StdMutex<HashSet<String>>>>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let calls: Vec<ToolCall> = records.iter().map(ToolCall::from_record).collect();
        let sibling_names: Vec<String> = calls.iter().map(|c| c.name.clone()).collect();

        let mut touched_paths: Vec<String> = Vec::new();
        for call in &calls {
            if writes_files(&call.name) {
                touched_paths.extend(file_paths_of(&call.args));
            }
        }
        touched_paths.dedup();

        // Partition preserving array order within each resource.
        let mut partitions: Vec<(String, Vec<(usize, ToolCall)>)> = Vec::new();
        for (index, call) in calls.into_iter().enumerate() {
            let key = resource_id(&call);
            match partitions.iter_mut().find(|(k, _)| *k == key) {
                Some((_, list)) => list.push((index, call)),
                None => partitions.push((key, vec![(index, call)])),
            }
        }
        debug!(
            calls = records.len(),
            partitions = partitions.len(),
            "scheduling tool batch"
        );

        let hook_failure: Arc<StdMutex<Option<HookReport>>> = Arc::new(StdMutex::new(None));
        let mut tasks = Vec::with_capacity(partitions.len());
        for (key, group) in partitions {
            let scheduler = Arc::clone(self);
            let mcp_config = Arc::clone(&mcp_config);
            let local = local_approvals.clone();
            let siblings = sibling_names.clone();
            let hook_failure = Arc::clone(&hook_failure);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .run_partition(key, group, mcp_config, local, siblings, hook_failure, cancel)
                    .await
            }));
        }

        let mut indexed: Vec<(usize, ToolOutput)> = Vec::with_capacity(records.len());
        for task in tasks {
            match task.await {
                Ok(mut outputs) => indexed.append(&mut outputs),
                Err(e) => warn!("tool partition task panicked: {e}"),
            }
        }
        indexed.sort_by_key(|(i, _)| *i);
        let outputs = indexed.into_iter().map(|(_, o)| o).collect();

        let hook_failure = hook_failure.lock().expect("hook slot").take();
        BatchOutcome {
            outputs,
            hook_failure,
            touched_paths,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_partition(
        &self,
        key: String,
        group: Vec<(usize, ToolCall)>,
        mcp_config: Arc<HashMap<String, McpServerConfig>>,
        local_approvals: Option<Arc<StdMutex<HashSet<String>>>>,
        siblings: Vec<String>,
        hook_failure: Arc<StdMutex<Option<HookReport>>>,
        cancel: CancellationToken,
    ) -> Vec<(usize, ToolOutput)> {
        let mut outputs = Vec::with_capacity(group.len());
        let mut aborted = false;

        for (index, call) in group {
            if aborted {
                outputs.push((
                    index,
                    ToolOutput::err(&call.id, "skipped: an earlier tool's hook aborted the turn"),
                ));
                continue;
            }
            if cancel.is_cancelled() {
                outputs.push((index, ToolOutput::err(&call.id, "cancelled")));
                continue;
            }

            let output = self
                .run_one(&call, &mcp_config, &local_approvals, &siblings, &cancel)
                .await;
            match output {
                RunResult::Output(out) => outputs.push((index, out)),
                RunResult::HookAbort(report) => {
                    warn!(partition = %key, tool = %call.name, "hook aborted; skipping partition remainder");
                    *hook_failure.lock().expect("hook slot") = Some(report.clone());
                    outputs.push((
                        index,
                        ToolOutput::err(
                            &call.id,
                            format!("hook '{}' aborted (exit {})", report.command, report.exit_code),
                        ),
                    ));
                    aborted = true;
                }
            }
        }
        outputs
    }

    async fn run_one(
        &self,
        call: &ToolCall,
        mcp_config: &HashMap<String, McpServerConfig>,
        local_approvals: &Option<Arc<StdMutex<HashSet<String>>>>,
        siblings: &[String],
        cancel: &CancellationToken,
    ) -> RunResult {
        // Approval decision path: session set → shared memory set → YOLO →
        // local (sub-agent) set → confirmation callback.
        let locally_approved = local_approvals
            .as_ref()
            .map(|s| s.lock().expect("local approvals").contains(&call.name))
            .unwrap_or(false);

        if !self.approvals.is_approved(&call.name) && !locally_approved {
            let is_sensitive = call.name == "terminal-execute"
                && call
                    .args
                    .get("command")
                    .and_then(serde_json::Value::as_str)
                    .map(|cmd| self.sensitive.matches(cmd).is_some())
                    .unwrap_or(false);

            let decision = self
                .interaction
                .confirm_tool(ConfirmationRequest {
                    call: ToolCallRecord {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.args.to_string(),
                    },
                    siblings: siblings.to_vec(),
                    is_sensitive,
                })
                .await;

            match decision {
                ConfirmationDecision::Approve => {}
                ConfirmationDecision::ApproveAlways => {
                    self.approvals.approve_always(&call.name);
                    if let Some(local) = local_approvals {
                        local
                            .lock()
                            .expect("local approvals")
                            .insert(call.name.clone());
                    }
                }
                ConfirmationDecision::Reject => {
                    return RunResult::Output(ToolOutput::err(
                        &call.id,
                        "Tool call rejected by the user.",
                    ))
                }
                ConfirmationDecision::RejectWithReply(reply) => {
                    return RunResult::Output(ToolOutput::err(
                        &call.id,
                        format!("Tool call rejected by the user: {reply}"),
                    ))
                }
            }
        }

        // Terminal commands get their own child token so ESC aborts the
        // command without cancelling the turn.
        let (effective_cancel, watch) = if call.name == "terminal-execute" && self.esc_interrupt {
            let child = cancel.child_token();
            let watch = spawn_esc_watch(child.clone());
            (child, watch)
        } else {
            (cancel.clone(), None)
        };

        let result = self
            .registry
            .dispatch(call, mcp_config, &effective_cancel)
            .await;

        // Stop the watcher; cancelling after completion is harmless.
        if watch.is_some() {
            effective_cancel.cancel();
        }

        match result {
            Ok(output) => RunResult::Output(output),
            Err(DispatchError::UserInteractionNeeded(question)) => {
                match self.interaction.ask_user(question).await {
                    Some(answer) => RunResult::Output(ToolOutput::ok(&call.id, answer)),
                    None => RunResult::Output(ToolOutput::err(
                        &call.id,
                        "Question was cancelled by the user.",
                    )),
                }
            }
            Err(DispatchError::HookAbort(report)) => RunResult::HookAbort(report),
        }
    }
}

enum RunResult {
    Output(ToolOutput),
    HookAbort(HookReport),
}

/// Raw-mode ESC listener, armed only while a terminal command runs and only
/// when stdin is a real terminal.
fn spawn_esc_watch(child: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
    use std::io::IsTerminal;
    if !std::io::stdin().is_terminal() {
        return None;
    }
    Some(tokio::task::spawn_blocking(move || {
        if crossterm::terminal::enable_raw_mode().is_err() {
            return;
        }
        while !child.is_cancelled() {
            if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(crossterm::event::Event::Key(key)) = crossterm::event::read() {
                    if key.code == crossterm::event::KeyCode::Esc {
                        child.cancel();
                        break;
                    }
                }
            }
        }
        let _ = crossterm::terminal::disable_raw_mode();
    }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
