// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The main conversation loop.
//!
//! Per user turn: compaction gate, model stream (through the retry
//! wrapper), tool rounds via the scheduler, file snapshots keyed at the
//! next message index, spawned-result injection at block-safe positions,
//! and persistence at every boundary.  The loop repeats until the model
//! returns no tool calls, a hook aborts, or the turn is cancelled.
//!
//! Turns on the same session serialize at loop entry: the engine takes the
//! session `&mut`, so the owner (one server task per session) is the single
//! writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use snow_config::McpServerConfig;
use snow_model::{
    stream_with_retry, CompletionRequest, Message, ModelProvider, RetryPolicy, StreamError,
    StreamEvent,
};
use snow_session::{Session, SessionStore, SnapshotStore};
use snow_tools::{CatalogInputs, ToolEvent, ToolRegistry};

use crate::{
    approval::ApprovalState,
    compactor::{Compactor, CompressionOutcome},
    events::EngineEvent,
    insert::safe_insert_index,
    scheduler::ToolScheduler,
    tracker::RunningAgentTracker,
    turn::accumulate_stream,
    useful_info::UsefulInfoService,
};

const MAX_TOOL_ROUNDS: u32 = 100;
const DEFAULT_SYSTEM_PROMPT: &str = "You are snow, a terminal-hosted AI coding assistant. \
     You work inside the user's project directory, read before you write, \
     and use the provided tools for every filesystem or terminal operation.";

/// Everything the engine is wired with at startup.  Module-level state in
/// spirit, but held explicitly by the process root and injected here.
pub struct EngineParts {
    pub provider: Arc<dyn ModelProvider>,
    pub registry: Arc<ToolRegistry>,
    pub scheduler: Arc<ToolScheduler>,
    pub tracker: Arc<RunningAgentTracker>,
    pub sessions: Arc<SessionStore>,
    pub snapshots: Arc<SnapshotStore>,
    pub approvals: Arc<ApprovalState>,
    pub compactor: Compactor,
    /// Environment context injected as an early user message on fresh
    /// sessions (and into every sub-agent spawn).
    pub useful_info: Arc<UsefulInfoService>,
    pub mcp_config: Arc<HashMap<String, McpServerConfig>>,
    pub catalog_inputs: CatalogInputs,
    /// Resolved system prompt override (active store entry / config id).
    pub system_override: Option<String>,
    /// Volatile context appended outside the cached prefix (language, …).
    pub dynamic_suffix: Option<String>,
    pub enable_auto_compress: bool,
    pub max_context_tokens: usize,
    pub retry_policy: RetryPolicy,
    /// Receiver for stateful tool events (todo updates).
    pub tool_events: mpsc::Receiver<ToolEvent>,
}

pub struct Engine {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    scheduler: Arc<ToolScheduler>,
    tracker: Arc<RunningAgentTracker>,
    sessions: Arc<SessionStore>,
    snapshots: Arc<SnapshotStore>,
    approvals: Arc<ApprovalState>,
    compactor: Compactor,
    useful_info: Arc<UsefulInfoService>,
    mcp_config: Arc<HashMap<String, McpServerConfig>>,
    catalog_inputs: CatalogInputs,
    system_override: Option<String>,
    dynamic_suffix: Option<String>,
    enable_auto_compress: bool,
    max_context_tokens: usize,
    retry_policy: RetryPolicy,
    tool_events: tokio::sync::Mutex<mpsc::Receiver<ToolEvent>>,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            provider: parts.provider,
            registry: parts.registry,
            scheduler: parts.scheduler,
            tracker: parts.tracker,
            sessions: parts.sessions,
            snapshots: parts.snapshots,
            approvals: parts.approvals,
            compactor: parts.compactor,
            useful_info: parts.useful_info,
            mcp_config: parts.mcp_config,
            catalog_inputs: parts.catalog_inputs,
            system_override: parts.system_override,
            dynamic_suffix: parts.dynamic_suffix,
            enable_auto_compress: parts.enable_auto_compress,
            max_context_tokens: parts.max_context_tokens,
            retry_policy: parts.retry_policy,
            tool_events: tokio::sync::Mutex::new(parts.tool_events),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn tracker(&self) -> &Arc<RunningAgentTracker> {
        &self.tracker
    }

    pub fn approvals(&self) -> &Arc<ApprovalState> {
        &self.approvals
    }

    /// Manual compaction entry (`POST /context/compress`).
    pub async fn compress_session(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> anyhow::Result<CompressionOutcome> {
        let outcome = self
            .compactor
            .maybe_compress(&mut session.messages, self.max_context_tokens, true, cancel)
            .await?;
        self.persist(session)?;
        Ok(outcome)
    }

    fn persist(&self, session: &mut Session) -> anyhow::Result<()> {
        session.always_approved = self.approvals.session_snapshot();
        self.sessions.save(session)
    }

    async fn emit(&self, tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
        let _ = tx.send(event).await;
    }

    async fn drain_tool_events(&self, tx: &mpsc::Sender<EngineEvent>) {
        let mut rx = self.tool_events.lock().await;
        while let Ok(event) = rx.try_recv() {
            match event {
                ToolEvent::TodoUpdate(items) => {
                    self.emit(tx, EngineEvent::TodoUpdate(items)).await;
                }
            }
        }
    }

    /// Process one user turn end to end.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_message: Message,
        tx: &mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        // Proactive compaction before the new user message grows the list.
        if self.enable_auto_compress {
            match self
                .compactor
                .maybe_compress(
                    &mut session.messages,
                    self.max_context_tokens,
                    false,
                    &cancel,
                )
                .await
            {
                Ok(CompressionOutcome::Compressed {
                    tokens_before,
                    tokens_after,
                }) => {
                    self.emit(
                        tx,
                        EngineEvent::ContextCompressed {
                            tokens_before,
                            tokens_after,
                        },
                    )
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    // Proceed uncompressed; the caller is informed.
                    warn!("compaction failed, continuing uncompressed: {e}");
                    self.emit(tx, EngineEvent::Error(format!("compaction failed: {e}")))
                        .await;
                }
            }
        }

        if session.messages.is_empty() {
            session.push(Message::system(DEFAULT_SYSTEM_PROMPT));
            // Useful-info context rides as an early user message on fresh
            // sessions only; later turns already carry it in history.
            // Appended directly so the session title still comes from the
            // user's first real message.
            let info = self.useful_info.context();
            if !info.is_empty() {
                session.messages.push(Message::user(info));
            }
        }
        self.emit(
            tx,
            EngineEvent::Message {
                role: "user".into(),
                content: user_message.content.clone(),
            },
        )
        .await;
        session.push(user_message);
        self.persist(session)?;

        let catalog = self.registry.catalog(&self.catalog_inputs).await;
        let mut produced_content = false;
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                session.push(Message::user(format!(
                    "You have reached the maximum tool-call budget ({MAX_TOOL_ROUNDS} rounds). \
                     Do not call any more tools; summarize what was completed and what remains."
                )));
            }

            let request = CompletionRequest {
                messages: session.messages.clone(),
                tools: if rounds > MAX_TOOL_ROUNDS {
                    Vec::new()
                } else {
                    catalog.tools.clone()
                },
                system_override: self.system_override.clone(),
                system_dynamic_suffix: self.dynamic_suffix.clone(),
                cache_key: Some(session.id.clone()),
            };

            let stream = stream_with_retry(
                Arc::clone(&self.provider),
                request,
                cancel.clone(),
                self.retry_policy.clone(),
            );

            let outcome = {
                let tx = tx.clone();
                let show = |event: &StreamEvent| {
                    let mapped = match event {
                        StreamEvent::Content(delta) => Some(EngineEvent::MessageDelta(delta.clone())),
                        StreamEvent::ReasoningDelta(delta) => {
                            Some(EngineEvent::Thinking(delta.clone()))
                        }
                        StreamEvent::Usage {
                            prompt_tokens,
                            completion_tokens,
                            cache_creation_tokens,
                            cache_read_tokens,
                        } => Some(EngineEvent::Usage {
                            prompt_tokens: *prompt_tokens,
                            completion_tokens: *completion_tokens,
                            cache_creation_tokens: *cache_creation_tokens,
                            cache_read_tokens: *cache_read_tokens,
                        }),
                        StreamEvent::RetryStatus {
                            attempt,
                            max_attempts,
                            delay_ms,
                            reason,
                        } => Some(EngineEvent::RetryStatus {
                            attempt: *attempt,
                            max_attempts: *max_attempts,
                            delay_ms: *delay_ms,
                            reason: reason.clone(),
                        }),
                        _ => None,
                    };
                    if let Some(event) = mapped {
                        // Streaming deltas must not block the turn on a slow
                        // consumer; the channel is sized for bursts.
                        let _ = tx.try_send(event);
                    }
                };
                accumulate_stream(stream, show).await
            };

            if let Some(error) = outcome.error {
                // Preserve partial streamed text, then surface the failure.
                if !outcome.text.is_empty() {
                    let mut msg = Message::assistant(&outcome.text);
                    msg.thinking = outcome.thinking.clone();
                    session.push(msg);
                    produced_content = true;
                }
                self.persist(session)?;
                if matches!(error, StreamError::Cancelled) {
                    break;
                }
                self.emit(tx, EngineEvent::Error(error.to_string())).await;
                if produced_content {
                    self.emit(
                        tx,
                        EngineEvent::Complete {
                            session_id: session.id.clone(),
                        },
                    )
                    .await;
                }
                return Err(error.into());
            }

            if outcome.tool_calls.is_empty() {
                if !outcome.text.is_empty() {
                    let mut msg = Message::assistant(&outcome.text);
                    msg.thinking = outcome.thinking;
                    session.push(msg);
                    produced_content = true;
                    self.emit(
                        tx,
                        EngineEvent::Message {
                            role: "assistant".into(),
                            content: outcome.text,
                        },
                    )
                    .await;
                }
                self.persist(session)?;
                break;
            }

            // ── Tool round ───────────────────────────────────────────────────
            produced_content = produced_content || !outcome.text.is_empty();
            let mut head = Message::assistant_with_calls(outcome.text, outcome.tool_calls.clone());
            head.thinking = outcome.thinking;
            session.push(head);
            for record in &outcome.tool_calls {
                self.emit(tx, EngineEvent::ToolCall(record.clone())).await;
            }

            debug!(
                round = rounds,
                calls = outcome.tool_calls.len(),
                "running tool batch"
            );
            let batch = self
                .scheduler
                .run_batch(
                    &outcome.tool_calls,
                    Arc::clone(&self.mcp_config),
                    None,
                    &cancel,
                )
                .await;

            // Snapshots keyed at the next message index capture the state
            // that exists before the results are appended.
            if !batch.touched_paths.is_empty() {
                if let Err(e) = self.snapshots.record(
                    &session.id,
                    session.messages.len(),
                    &batch.touched_paths,
                ) {
                    warn!("file snapshot failed: {e}");
                }
            }

            debug_assert_eq!(batch.outputs.len(), outcome.tool_calls.len());
            for (record, output) in outcome.tool_calls.iter().zip(batch.outputs.iter()) {
                self.emit(
                    tx,
                    EngineEvent::ToolResult {
                        call_id: output.call_id.clone(),
                        tool_name: record.name.clone(),
                        content: output.content.clone(),
                        is_error: output.is_error,
                    },
                )
                .await;
                session.push(Message::tool_result_with_images(
                    &output.call_id,
                    &output.content,
                    output.images.clone(),
                ));
            }
            self.drain_tool_events(tx).await;

            if let Some(report) = batch.hook_failure {
                self.persist(session)?;
                self.emit(tx, EngineEvent::HookFailed(report)).await;
                break;
            }

            // Results of sub-agents spawned by sub-agents, injected as user
            // messages at a block-safe position.
            let spawned = self.tracker.drain_spawned_results();
            if !spawned.is_empty() {
                self.emit(tx, EngineEvent::AgentListChanged).await;
            }
            for result in spawned {
                let idx = safe_insert_index(&session.messages, 0);
                session.messages.insert(
                    idx,
                    Message::user(format!(
                        "[result from spawned agent '{}']\n{}",
                        result.name, result.result
                    )),
                );
            }

            self.persist(session)?;
        }

        self.persist(session)?;
        self.emit(
            tx,
            EngineEvent::Complete {
                session_id: session.id.clone(),
            },
        )
        .await;
        Ok(())
    }

    /// Give buffered spawned agents a chance to finish before a turn ends.
    /// Used by callers that want S5-style determinism in tests and CI.
    pub async fn wait_for_spawned_agents(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        self.tracker.wait_for_spawned_agents(timeout, cancel).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ConfirmationDecision, ConfirmationRequest, InteractionHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use snow_config::SensitiveCommandsStore;
    use snow_mcp::McpClientPool;
    use snow_model::{MockProvider, Role, ToolCallRecord};
    use snow_tools::{HookRunner, Tool, ToolCall, ToolOutput, UserQuestion};

    struct AutoApprove;

    #[async_trait]
    impl InteractionHandler for AutoApprove {
        async fn confirm_tool(&self, _r: ConfirmationRequest) -> ConfirmationDecision {
            ConfirmationDecision::Approve
        }
        async fn ask_user(&self, _q: UserQuestion) -> Option<String> {
            Some("answer".into())
        }
    }

    struct StaticReadTool;

    #[async_trait]
    impl Tool for StaticReadTool {
        fn name(&self) -> &str {
            "filesystem-read"
        }
        fn description(&self) -> &str {
            "read"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _c: &CancellationToken) -> ToolOutput {
            let path = call.args["filePath"].as_str().unwrap_or("?");
            ToolOutput::ok(&call.id, format!("contents of {path}"))
        }
    }

    struct TestHarness {
        engine: Engine,
        _dir: tempfile::TempDir,
    }

    fn harness(mock: Arc<MockProvider>) -> TestHarness {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = ToolRegistry::new(Arc::new(McpClientPool::new()), HookRunner::default(), 0);
        reg.register(StaticReadTool);
        let registry = Arc::new(reg);
        let approvals = Arc::new(ApprovalState::new(vec!["filesystem-read".into()]));
        let scheduler = Arc::new(
            ToolScheduler::new(
                Arc::clone(&registry),
                Arc::clone(&approvals),
                Arc::new(SensitiveCommandsStore::default()),
                Arc::new(AutoApprove),
            )
            .with_esc_interrupt(false),
        );
        let engine = Engine::new(EngineParts {
            provider: mock.clone(),
            registry,
            scheduler,
            tracker: Arc::new(RunningAgentTracker::new()),
            sessions: Arc::new(SessionStore::new(dir.path().join("sessions"), "p1")),
            snapshots: Arc::new(SnapshotStore::new(dir.path().join("snapshots"))),
            approvals,
            compactor: Compactor::new(mock, HookRunner::default()),
            useful_info: UsefulInfoService::new(dir.path().to_path_buf()),
            mcp_config: Arc::new(HashMap::new()),
            catalog_inputs: CatalogInputs::default(),
            system_override: None,
            dynamic_suffix: None,
            enable_auto_compress: false,
            max_context_tokens: 128_000,
            retry_policy: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            tool_events: mpsc::channel(8).1,
        });
        TestHarness { engine, _dir: dir }
    }

    async fn run(engine: &Engine, session: &mut Session, text: &str) -> Vec<EngineEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        engine
            .run_turn(session, Message::user(text), &tx, CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    // S1 — simple text turn.
    #[tokio::test]
    async fn simple_text_turn_streams_and_completes() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("hello")]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();

        let events = run(&h.engine, &mut session, "hi").await;

        assert!(matches!(&events[0], EngineEvent::Message { role, content }
            if role == "user" && content == "hi"));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::MessageDelta(d) if d == "hello")));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Usage { .. })));
        assert!(matches!(events.last().unwrap(), EngineEvent::Complete { .. }));

        // Session: system + useful-info + user + assistant.
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[0].role, Role::System);
        assert_eq!(session.messages[1].role, Role::User);
        assert!(session.messages[1].content.contains("Working directory:"));
        assert_eq!(session.messages[3].content, "hello");
    }

    #[tokio::test]
    async fn useful_info_is_injected_once_per_session() {
        let mock = MockProvider::new(vec![
            MockProvider::text_turn("first"),
            MockProvider::text_turn("second"),
        ]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();
        run(&h.engine, &mut session, "turn one").await;
        run(&h.engine, &mut session, "turn two").await;

        let info_messages = session
            .messages
            .iter()
            .filter(|m| m.content.contains("Working directory:"))
            .count();
        assert_eq!(info_messages, 1, "only the fresh session gets the block");
    }

    // S2 — parallel reads, then summary.
    #[tokio::test]
    async fn tool_round_then_summary() {
        let mock = MockProvider::new(vec![
            MockProvider::tool_turn(vec![
                ToolCallRecord {
                    id: "c1".into(),
                    name: "filesystem-read".into(),
                    arguments: r#"{"filePath":"a.txt"}"#.into(),
                },
                ToolCallRecord {
                    id: "c2".into(),
                    name: "filesystem-read".into(),
                    arguments: r#"{"filePath":"b.txt"}"#.into(),
                },
            ]),
            MockProvider::text_turn("both files read"),
        ]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();

        let events = run(&h.engine, &mut session, "read a.txt and b.txt").await;

        let results: Vec<&EngineEvent> = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ToolResult { .. }))
            .collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], EngineEvent::ToolResult { call_id, content, .. }
            if call_id == "c1" && content.contains("a.txt")));

        // Tool-response completeness (property 1): the block is contiguous
        // and complete.
        let head_idx = session
            .messages
            .iter()
            .position(|m| !m.tool_calls.is_empty())
            .unwrap();
        assert_eq!(session.messages[head_idx + 1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(session.messages[head_idx + 2].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(session.messages.last().unwrap().content, "both files read");
        assert!(matches!(events.last().unwrap(), EngineEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn session_is_persisted_across_rounds() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("saved")]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();
        run(&h.engine, &mut session, "persist me").await;

        let loaded = h.engine.sessions().load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), session.messages.len());
        assert_eq!(loaded.title, "persist me");
    }

    #[tokio::test]
    async fn cancellation_before_start_emits_complete_only() {
        let mock = MockProvider::new(vec![MockProvider::text_turn("never")]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(64);
        h.engine
            .run_turn(&mut session, Message::user("x"), &tx, cancel)
            .await
            .unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(matches!(events.last().unwrap(), EngineEvent::Complete { .. }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::MessageDelta(_))));
    }

    #[tokio::test]
    async fn permanent_stream_error_surfaces_as_error_event() {
        let mock = MockProvider::new(vec![vec![Err(StreamError::from_status(400, "bad".into()))]]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();

        let (tx, mut rx) = mpsc::channel(64);
        let result = h
            .engine
            .run_turn(
                &mut session,
                Message::user("x"),
                &tx,
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        drop(tx);
        let mut saw_error = false;
        while let Some(e) = rx.recv().await {
            if matches!(e, EngineEvent::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn retried_stream_applies_content_once() {
        // Property 8: truncation before any tool_calls chunk → one combined
        // stream, no double-applied text.
        let mock = MockProvider::new(vec![
            vec![
                Ok(StreamEvent::Content("orphan ".into())),
                Err(StreamError::Truncated),
            ],
            MockProvider::text_turn("final answer"),
        ]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();
        run(&h.engine, &mut session, "q").await;

        let assistant = session
            .messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(assistant.content, "final answer");
        assert!(!assistant.content.contains("orphan"));
    }

    #[tokio::test]
    async fn thinking_is_stored_on_the_assistant_message() {
        let mock = MockProvider::new(vec![vec![
            Ok(StreamEvent::ReasoningDelta("let me think".into())),
            Ok(StreamEvent::Content("answer".into())),
            Ok(StreamEvent::Done { thinking: None }),
        ]]);
        let h = harness(mock);
        let mut session = h.engine.sessions().create();
        run(&h.engine, &mut session, "q").await;

        let assistant = session
            .messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(assistant.thinking.as_deref(), Some("let me think"));
    }
}
