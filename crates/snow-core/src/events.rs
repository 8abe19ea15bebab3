// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
use snow_model::ToolCallRecord;
use snow_tools::{HookReport, TodoItem};

/// Events emitted by the engine while processing a turn.
/// The SSE transport maps these onto its wire event types; the engine never
/// sees connections.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Assistant text streaming delta.
    MessageDelta(String),
    /// A finalized message (role-tagged) was appended to the session.
    Message { role: String, content: String },
    /// Reasoning delta, forwarded when `showThinking` is on.
    Thinking(String),
    /// The model requested a tool call.
    ToolCall(ToolCallRecord),
    /// A tool finished.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    /// Final usage statistics for one provider request.
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        cache_creation_tokens: u32,
        cache_read_tokens: u32,
    },
    /// The provider stream is being retried; partial content is void.
    RetryStatus {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
    /// The user must confirm a tool call.
    ToolConfirmationRequest {
        request_id: String,
        call: ToolCallRecord,
        /// Names of the sibling tools in the same batch, for context.
        siblings: Vec<String>,
        is_sensitive: bool,
    },
    /// The model asked the user a structured question.
    UserQuestionRequest {
        request_id: String,
        question: String,
        options: Vec<String>,
    },
    /// A hook aborted the turn.
    HookFailed(HookReport),
    /// The todo list changed.
    TodoUpdate(Vec<TodoItem>),
    /// Context was compressed; token counts for the UI.
    ContextCompressed {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// A sub-agent started or stopped; the tracker snapshot changed.
    AgentListChanged,
    /// Non-fatal error surfaced to the client.
    Error(String),
    /// The turn finished; any streamed assistant content is final.
    Complete { session_id: String },
}
