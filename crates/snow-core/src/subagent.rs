// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent runtime: isolated conversation loops spawned as tools.
//!
//! Every configured agent is advertised as a `subagent-<id>` tool.  A spawn
//! registers an instance in the tracker, runs the same model ↔ tool loop as
//! the main conversation against a fresh message list, and returns only the
//! final stringified result — the sub-agent's history is never merged into
//! its parent's.  Agents spawned *by* sub-agents write their result to the
//! spawned-results queue instead, which the main loop drains between its own
//! tool rounds.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use snow_config::{McpServerConfig, SubAgentConfig};
use snow_model::{
    stream_with_retry, CompletionRequest, Message, ModelProvider, RetryPolicy, ToolSchema,
};
use snow_tools::{CatalogInputs, HookOutcome, HookPoint, HookRunner, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::{
    scheduler::ToolScheduler,
    tracker::{InterAgentMessage, RunningAgentInfo, RunningAgentTracker, SpawnedResult},
    turn::accumulate_stream,
    useful_info::UsefulInfoService,
};

const MAX_DEPTH: usize = 3;
const MAX_ROUNDS: u32 = 50;
const EMPTY_RESPONSE_RETRIES: u32 = 3;

/// Everything a sub-agent loop needs.  Set once at startup, after the
/// registry and scheduler exist (the spawn tools are registered *into* the
/// registry, so the dependencies arrive late).
pub struct SubAgentDeps {
    pub provider: Arc<dyn ModelProvider>,
    /// Named profile overrides (config `profiles` → constructed providers).
    pub profile_providers: HashMap<String, Arc<dyn ModelProvider>>,
    pub registry: Arc<ToolRegistry>,
    pub scheduler: Arc<ToolScheduler>,
    pub tracker: Arc<RunningAgentTracker>,
    pub hooks: HookRunner,
    pub mcp_config: Arc<HashMap<String, McpServerConfig>>,
    pub catalog_inputs: CatalogInputs,
    /// Environment context injected ahead of AGENTS.md in every spawn.
    pub useful_info: Arc<UsefulInfoService>,
    /// Project root, for AGENTS.md context.
    pub project_root: PathBuf,
    pub retry_policy: RetryPolicy,
}

#[derive(Default)]
pub struct SubAgentRuntime {
    deps: OnceLock<SubAgentDeps>,
    depth: AtomicUsize,
}

impl SubAgentRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire the dependencies.  Must be called exactly once before any spawn.
    pub fn init(&self, deps: SubAgentDeps) {
        if self.deps.set(deps).is_err() {
            warn!("sub-agent runtime initialized twice; keeping the first wiring");
        }
    }

    fn deps(&self) -> Option<&SubAgentDeps> {
        self.deps.get()
    }
}

/// `_` and `-` are interchangeable in allowed-tool globs.
fn normalize_tool_name(name: &str) -> String {
    name.replace('_', "-")
}

/// Minimal glob: `*` matches anything, `?` one character.
fn glob_match(pattern: &str, name: &str) -> bool {
    let mut re = String::from("^");
    for ch in normalize_tool_name(pattern).chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
        .map(|r| r.is_match(&normalize_tool_name(name)))
        .unwrap_or(false)
}

/// The `subagent-<id>` spawn tool.
pub struct SubAgentTool {
    spec: SubAgentConfig,
    tool_name: String,
    runtime: Arc<SubAgentRuntime>,
}

impl SubAgentTool {
    pub fn new(spec: SubAgentConfig, runtime: Arc<SubAgentRuntime>) -> Self {
        let tool_name = format!("subagent-{}", spec.id);
        Self {
            spec,
            tool_name,
            runtime,
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.spec.role_prompt
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task for this agent"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(Value::as_str) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required field: prompt"),
        };
        let Some(deps) = self.runtime.deps() else {
            return ToolOutput::err(&call.id, "sub-agent runtime not initialized");
        };

        let depth = self.runtime.depth.fetch_add(1, Ordering::SeqCst);
        if depth >= MAX_DEPTH {
            self.runtime.depth.fetch_sub(1, Ordering::SeqCst);
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent nesting depth ({MAX_DEPTH}) reached"),
            );
        }
        let nested = depth > 0;

        // Instances spawned by sub-agents are `spawn-` prefixed; the tracker
        // keys waitForSpawnedAgents off that prefix.
        let instance_id = if nested {
            format!("spawn-{}", uuid::Uuid::new_v4())
        } else {
            format!("{}-{}", self.spec.id, uuid::Uuid::new_v4())
        };
        deps.tracker.register(RunningAgentInfo {
            instance_id: instance_id.clone(),
            agent_id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            prompt: prompt.clone(),
            started_at: chrono::Utc::now(),
        });

        let result = run_sub_agent_loop(deps, &self.spec, &instance_id, &prompt, cancel).await;

        deps.tracker.unregister(&instance_id);
        self.runtime.depth.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(text) if nested => {
                // Buffered for the main loop; the parent only gets an ack.
                deps.tracker.push_spawned_result(SpawnedResult {
                    instance_id,
                    agent_id: self.spec.id.clone(),
                    name: self.spec.name.clone(),
                    result: text,
                });
                ToolOutput::ok(
                    &call.id,
                    format!(
                        "sub-agent '{}' finished; its result was queued for the main conversation",
                        self.spec.name
                    ),
                )
            }
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent '{}': {e}", self.spec.name)),
        }
    }
}

/// The isolated loop: same shape as the main conversation, minus session
/// persistence and snapshots.
async fn run_sub_agent_loop(
    deps: &SubAgentDeps,
    spec: &SubAgentConfig,
    instance_id: &str,
    prompt: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    // Tool surface: the global catalog filtered by the allowed globs.
    let catalog = deps.registry.catalog(&deps.catalog_inputs).await;
    let tools: Vec<ToolSchema> = catalog
        .tools
        .iter()
        .filter(|t| {
            spec.allowed_tools.is_empty()
                || spec
                    .allowed_tools
                    .iter()
                    .any(|pattern| glob_match(pattern, &t.name))
        })
        .cloned()
        .collect();
    if tools.is_empty() && !spec.allowed_tools.is_empty() {
        anyhow::bail!(
            "allowed-tools list {:?} matches no tool in the catalog",
            spec.allowed_tools
        );
    }

    let provider = spec
        .profile
        .as_deref()
        .and_then(|p| deps.profile_providers.get(p))
        .cloned()
        .unwrap_or_else(|| Arc::clone(&deps.provider));

    // Fresh context: useful-info block, then AGENTS.md, then the task.
    let mut messages = vec![Message::system(&spec.role_prompt)];
    let info = deps.useful_info.context();
    if !info.is_empty() {
        messages.push(Message::user(info));
    }
    if let Ok(agents_md) = std::fs::read_to_string(deps.project_root.join("AGENTS.md")) {
        messages.push(Message::user(format!(
            "Project context (AGENTS.md):\n\n{agents_md}"
        )));
    }
    messages.push(Message::user(prompt));

    // Approvals granted inside this agent apply to its remaining calls
    // immediately, on top of the shared sets.
    let local_approvals: Arc<StdMutex<HashSet<String>>> = Arc::new(StdMutex::new(HashSet::new()));

    let mut final_text = String::new();
    let mut empty_retries = 0u32;
    let mut rounds = 0u32;

    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("cancelled");
        }
        rounds += 1;
        if rounds > MAX_ROUNDS {
            anyhow::bail!("sub-agent exceeded {MAX_ROUNDS} tool rounds");
        }

        // Injected messages surface only at iteration boundaries.
        for injected in deps.tracker.drain_user_messages(instance_id) {
            messages.push(Message::user(format!("[user] {injected}")));
        }
        for msg in deps.tracker.drain_inter_agent(instance_id) {
            messages.push(Message::user(format!(
                "[message from agent '{}'] {}",
                msg.from_agent_id, msg.content
            )));
        }

        let request = CompletionRequest {
            messages: messages.clone(),
            tools: tools.clone(),
            system_override: None,
            system_dynamic_suffix: None,
            cache_key: Some(instance_id.to_string()),
        };
        let stream = stream_with_retry(
            Arc::clone(&provider),
            request,
            cancel.clone(),
            deps.retry_policy.clone(),
        );
        let outcome = accumulate_stream(stream, |_| {}).await;
        if let Some(e) = outcome.error {
            anyhow::bail!("model stream failed: {e}");
        }

        // Empty-response guard: zero content and zero tool calls.
        if outcome.text.is_empty() && outcome.tool_calls.is_empty() {
            empty_retries += 1;
            if empty_retries >= EMPTY_RESPONSE_RETRIES {
                anyhow::bail!("model produced {EMPTY_RESPONSE_RETRIES} empty responses in a row");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        empty_retries = 0;

        if outcome.tool_calls.is_empty() {
            final_text = outcome.text;

            // Completion hooks may feed a message back in, re-entering the
            // loop instead of returning.
            let mut env = HashMap::new();
            env.insert("SNOW_SUBAGENT_ID".to_string(), spec.id.clone());
            env.insert("SNOW_SUBAGENT_RESULT".to_string(), final_text.clone());
            match deps.hooks.run(HookPoint::OnSubAgentComplete, &env).await {
                HookOutcome::ContinueWithMessage(injected) => {
                    debug!(agent = %spec.id, "completion hook re-entered the loop");
                    messages.push(Message::assistant(&final_text));
                    messages.push(Message::user(injected));
                    continue;
                }
                HookOutcome::Abort(report) => {
                    anyhow::bail!(
                        "completion hook aborted (exit {}): {}",
                        report.exit_code,
                        report.error
                    );
                }
                HookOutcome::Warn(w) => {
                    final_text = format!("{final_text}\n\n[hook] {w}");
                    break;
                }
                HookOutcome::Continue => break,
            }
        }

        messages.push(Message::assistant_with_calls(
            outcome.text.clone(),
            outcome.tool_calls.clone(),
        ));

        let batch = deps
            .scheduler
            .run_batch(
                &outcome.tool_calls,
                Arc::clone(&deps.mcp_config),
                Some(Arc::clone(&local_approvals)),
                cancel,
            )
            .await;
        if let Some(report) = batch.hook_failure {
            anyhow::bail!("tool hook aborted (exit {})", report.exit_code);
        }
        for output in batch.outputs {
            messages.push(Message::tool_result_with_images(
                &output.call_id,
                &output.content,
                output.images.clone(),
            ));
        }
    }

    Ok(final_text)
}

/// Inter-agent messaging tool: `agent-send_message_to_agent`.
pub struct SendMessageTool {
    tracker: Arc<RunningAgentTracker>,
}

impl SendMessageTool {
    pub fn new(tracker: Arc<RunningAgentTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "agent-send_message_to_agent"
    }

    fn description(&self) -> &str {
        "Send a message to another running agent, addressed by agent type. \
         The first running instance of that type receives it at its next \
         iteration boundary."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string", "description": "Target agent type" },
                "message": { "type": "string" }
            },
            "required": ["agentId", "message"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _cancel: &CancellationToken) -> ToolOutput {
        let agent_id = match call.args.get("agentId").and_then(Value::as_str) {
            Some(a) => a,
            None => return ToolOutput::err(&call.id, "missing required field: agentId"),
        };
        let message = match call.args.get("message").and_then(Value::as_str) {
            Some(m) => m,
            None => return ToolOutput::err(&call.id, "missing required field: message"),
        };
        match self.tracker.enqueue_inter_agent(
            agent_id,
            InterAgentMessage {
                from_instance: call.id.clone(),
                from_agent_id: String::new(),
                content: message.to_string(),
            },
        ) {
            Ok(instance) => ToolOutput::ok(
                &call.id,
                format!("message queued for instance '{instance}'"),
            ),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalState;
    use crate::scheduler::{ConfirmationDecision, ConfirmationRequest, InteractionHandler};
    use snow_mcp::McpClientPool;
    use snow_model::MockProvider;
    use snow_tools::UserQuestion;

    struct AutoApprove;

    #[async_trait]
    impl InteractionHandler for AutoApprove {
        async fn confirm_tool(&self, _r: ConfirmationRequest) -> ConfirmationDecision {
            ConfirmationDecision::Approve
        }
        async fn ask_user(&self, _q: UserQuestion) -> Option<String> {
            None
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "filesystem-read"
        }
        fn description(&self) -> &str {
            "test read"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _c: &CancellationToken) -> ToolOutput {
            // Long enough for the test tasks injecting tracker messages to
            // observe the running instance.
            tokio::time::sleep(Duration::from_millis(30)).await;
            ToolOutput::ok(&call.id, "file contents")
        }
    }

    fn spec(allowed: &[&str]) -> SubAgentConfig {
        SubAgentConfig {
            id: "agent_plan".into(),
            name: "Planner".into(),
            role_prompt: "You produce plans.".into(),
            allowed_tools: allowed.iter().map(|s| s.to_string()).collect(),
            profile: None,
        }
    }

    fn runtime_with(provider: Arc<dyn ModelProvider>, project_root: PathBuf) -> Arc<SubAgentRuntime> {
        let mut reg = ToolRegistry::new(
            Arc::new(McpClientPool::new()),
            snow_tools::HookRunner::default(),
            0,
        );
        reg.register(EchoTool);
        let registry = Arc::new(reg);
        let tracker = Arc::new(RunningAgentTracker::new());
        let scheduler = Arc::new(
            ToolScheduler::new(
                Arc::clone(&registry),
                Arc::new(ApprovalState::new(vec!["filesystem-read".into()])),
                Arc::new(snow_config::SensitiveCommandsStore::default()),
                Arc::new(AutoApprove),
            )
            .with_esc_interrupt(false),
        );

        let runtime = SubAgentRuntime::new();
        runtime.init(SubAgentDeps {
            provider,
            profile_providers: HashMap::new(),
            registry,
            scheduler,
            tracker,
            hooks: snow_tools::HookRunner::default(),
            mcp_config: Arc::new(HashMap::new()),
            catalog_inputs: CatalogInputs::default(),
            useful_info: UsefulInfoService::new(project_root.clone()),
            project_root,
            retry_policy: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        });
        runtime
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "s1".into(),
            name: "subagent-agent_plan".into(),
            args,
        }
    }

    // ── glob matching ─────────────────────────────────────────────────────────

    #[test]
    fn glob_star_matches_prefix() {
        assert!(glob_match("filesystem-*", "filesystem-read"));
        assert!(!glob_match("filesystem-*", "terminal-execute"));
    }

    #[test]
    fn glob_underscore_dash_equivalence() {
        assert!(glob_match("filesystem_read", "filesystem-read"));
        assert!(glob_match("filesystem-read", "filesystem_read"));
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        assert!(glob_match("todo-rea?", "todo-read"));
        assert!(!glob_match("todo-rea?", "todo-ready"));
    }

    // ── spawn protocol ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn spawn_context_orders_info_then_agents_md_then_task() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "follow the house rules").unwrap();
        let mock = MockProvider::new(vec![MockProvider::text_turn("ok")]);
        let runtime = runtime_with(
            Arc::clone(&mock) as Arc<dyn ModelProvider>,
            dir.path().to_path_buf(),
        );
        let tool = SubAgentTool::new(spec(&[]), runtime);

        let out = tool
            .execute(&call(json!({"prompt": "the task"})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);

        let requests = mock.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages[0].content, "You produce plans.");
        assert!(
            messages[1].content.contains("Working directory:"),
            "useful-info must come first: {}",
            messages[1].content
        );
        assert!(messages[2].content.contains("follow the house rules"));
        assert_eq!(messages[3].content, "the task");
    }

    #[tokio::test]
    async fn happy_path_returns_final_text() {
        let dir = tempfile::tempdir().unwrap();
        // Round 1: read a file; round 2: final plan.
        let mock = MockProvider::new(vec![
            MockProvider::tool_turn(vec![snow_model::ToolCallRecord {
                id: "c1".into(),
                name: "filesystem-read".into(),
                arguments: r#"{"filePath":"x"}"#.into(),
            }]),
            MockProvider::text_turn("the plan: do X then Y"),
        ]);
        let runtime = runtime_with(mock, dir.path().to_path_buf());
        let tool = SubAgentTool::new(spec(&[]), runtime);

        let out = tool
            .execute(&call(json!({"prompt": "plan the refactor"})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "the plan: do X then Y");
    }

    #[tokio::test]
    async fn tracker_registers_during_run_and_clears_after() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(vec![MockProvider::text_turn("done")]);
        let runtime = runtime_with(mock, dir.path().to_path_buf());
        let tracker = Arc::clone(&runtime.deps().unwrap().tracker);
        let tool = SubAgentTool::new(spec(&[]), runtime);

        assert_eq!(tracker.count(), 0);
        let out = tool
            .execute(&call(json!({"prompt": "x"})), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert_eq!(tracker.count(), 0, "instance must unregister on return");
    }

    #[tokio::test]
    async fn empty_allowed_list_match_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(vec![MockProvider::text_turn("unused")]);
        let runtime = runtime_with(mock, dir.path().to_path_buf());
        let tool = SubAgentTool::new(spec(&["no-such-tool-*"]), runtime);

        let out = tool
            .execute(&call(json!({"prompt": "x"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("matches no tool"));
    }

    #[tokio::test]
    async fn missing_prompt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(vec![]);
        let runtime = runtime_with(mock, dir.path().to_path_buf());
        let tool = SubAgentTool::new(spec(&[]), runtime);
        let out = tool.execute(&call(json!({})), &CancellationToken::new()).await;
        assert!(out.is_error);
        assert!(out.content.contains("prompt"));
    }

    #[tokio::test]
    async fn queued_user_message_surfaces_at_iteration_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(vec![
            MockProvider::tool_turn(vec![snow_model::ToolCallRecord {
                id: "c1".into(),
                name: "filesystem-read".into(),
                arguments: "{}".into(),
            }]),
            MockProvider::text_turn("done"),
        ]);
        let runtime = runtime_with(Arc::clone(&mock) as Arc<dyn ModelProvider>, dir.path().to_path_buf());
        let tracker = Arc::clone(&runtime.deps().unwrap().tracker);
        let tool = Arc::new(SubAgentTool::new(spec(&[]), runtime));

        // Inject as soon as the instance registers.
        let tracker2 = Arc::clone(&tracker);
        tokio::spawn(async move {
            loop {
                let list = tracker2.list();
                if let Some(info) = list.first() {
                    tracker2.enqueue_user_message(&info.instance_id, "hurry up");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let out = tool
            .execute(&call(json!({"prompt": "task"})), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);

        // The second request must contain the injected user turn.
        let requests = mock.requests.lock().unwrap();
        let second = &requests[requests.len() - 1];
        assert!(
            second
                .messages
                .iter()
                .any(|m| m.content.contains("hurry up")),
            "injected message missing from follow-up request"
        );
    }

    #[tokio::test]
    async fn empty_responses_exhaust_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let empty = || {
            vec![Ok(snow_model::StreamEvent::Done { thinking: None })]
        };
        let mock = MockProvider::new(vec![empty(), empty(), empty()]);
        let runtime = runtime_with(mock, dir.path().to_path_buf());
        let tool = SubAgentTool::new(spec(&[]), runtime);

        let out = tool
            .execute(&call(json!({"prompt": "x"})), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("empty responses"));
    }

    // ── send_message tool ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_message_enqueues_to_running_agent() {
        let tracker = Arc::new(RunningAgentTracker::new());
        tracker.register(RunningAgentInfo {
            instance_id: "i1".into(),
            agent_id: "agent_code".into(),
            name: "Coder".into(),
            prompt: "p".into(),
            started_at: chrono::Utc::now(),
        });
        let tool = SendMessageTool::new(Arc::clone(&tracker));
        let out = tool
            .execute(
                &ToolCall {
                    id: "m1".into(),
                    name: "agent-send_message_to_agent".into(),
                    args: json!({"agentId": "agent_code", "message": "sync up"}),
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(tracker.drain_inter_agent("i1").len(), 1);
    }

    #[tokio::test]
    async fn send_message_to_absent_agent_fails() {
        let tool = SendMessageTool::new(Arc::new(RunningAgentTracker::new()));
        let out = tool
            .execute(
                &ToolCall {
                    id: "m1".into(),
                    name: "agent-send_message_to_agent".into(),
                    args: json!({"agentId": "ghost", "message": "x"}),
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
    }
}
