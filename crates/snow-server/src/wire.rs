// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: MIT
//! Wire event shape and the engine → wire mapping.
//!
//! Every SSE payload is a single JSON object
//! `{type, data, timestamp, requestId?}` on a `data:` line.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use snow_core::EngineEvent;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl WireEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// The SSE frame body (`data: <json>`; the transport adds the blank line).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Map an engine event onto the wire vocabulary.
pub fn map_engine_event(event: EngineEvent) -> WireEvent {
    match event {
        EngineEvent::MessageDelta(delta) => WireEvent::new(
            "message",
            json!({ "role": "assistant", "streaming": true, "delta": delta }),
        ),
        EngineEvent::Message { role, content } => {
            WireEvent::new("message", json!({ "role": role, "content": content }))
        }
        EngineEvent::Thinking(delta) => WireEvent::new("thinking", json!({ "delta": delta })),
        EngineEvent::ToolCall(call) => WireEvent::new(
            "tool_call",
            json!({ "id": call.id, "name": call.name, "arguments": call.arguments }),
        ),
        EngineEvent::ToolResult {
            call_id,
            tool_name,
            content,
            is_error,
        } => WireEvent::new(
            "tool_result",
            json!({
                "callId": call_id,
                "toolName": tool_name,
                "content": content,
                "isError": is_error,
            }),
        ),
        EngineEvent::Usage {
            prompt_tokens,
            completion_tokens,
            cache_creation_tokens,
            cache_read_tokens,
        } => WireEvent::new(
            "usage",
            json!({
                "promptTokens": prompt_tokens,
                "completionTokens": completion_tokens,
                "cacheCreationTokens": cache_creation_tokens,
                "cacheReadTokens": cache_read_tokens,
            }),
        ),
        EngineEvent::RetryStatus {
            attempt,
            max_attempts,
            delay_ms,
            reason,
        } => WireEvent::new(
            "retry_status",
            json!({
                "attempt": attempt,
                "maxAttempts": max_attempts,
                "delayMs": delay_ms,
                "reason": reason,
            }),
        ),
        EngineEvent::ToolConfirmationRequest {
            request_id,
            call,
            siblings,
            is_sensitive,
        } => WireEvent::new(
            "tool_confirmation_request",
            json!({
                "call": { "id": call.id, "name": call.name, "arguments": call.arguments },
                "siblings": siblings,
                "isSensitive": is_sensitive,
            }),
        )
        .with_request_id(request_id),
        EngineEvent::UserQuestionRequest {
            request_id,
            question,
            options,
        } => WireEvent::new(
            "user_question_request",
            json!({ "question": question, "options": options }),
        )
        .with_request_id(request_id),
        EngineEvent::HookFailed(report) => WireEvent::new(
            "error",
            json!({
                "kind": "hookFailed",
                "command": report.command,
                "output": report.output,
                "error": report.error,
                "exitCode": report.exit_code,
            }),
        ),
        EngineEvent::TodoUpdate(items) => WireEvent::new(
            "todo_update",
            serde_json::to_value(items).unwrap_or(Value::Null),
        ),
        EngineEvent::ContextCompressed {
            tokens_before,
            tokens_after,
        } => WireEvent::new(
            "context_compressed",
            json!({ "tokensBefore": tokens_before, "tokensAfter": tokens_after }),
        ),
        EngineEvent::AgentListChanged => WireEvent::new("agent_list", Value::Null),
        EngineEvent::Error(message) => WireEvent::new("error", json!({ "message": message })),
        EngineEvent::Complete { session_id } => {
            WireEvent::new("complete", json!({ "sessionId": session_id }))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use snow_model::ToolCallRecord;

    #[test]
    fn wire_event_serializes_with_type_and_timestamp() {
        let e = WireEvent::new("complete", json!({ "sessionId": "s1" }));
        let v: Value = serde_json::from_str(&e.to_json()).unwrap();
        assert_eq!(v["type"], "complete");
        assert_eq!(v["data"]["sessionId"], "s1");
        assert!(v["timestamp"].is_i64());
        assert!(v.get("requestId").is_none());
    }

    #[test]
    fn request_id_rides_on_confirmation_events() {
        let e = map_engine_event(EngineEvent::ToolConfirmationRequest {
            request_id: "req-9".into(),
            call: ToolCallRecord {
                id: "c".into(),
                name: "terminal-execute".into(),
                arguments: "{}".into(),
            },
            siblings: vec!["terminal-execute".into()],
            is_sensitive: true,
        });
        let v: Value = serde_json::from_str(&e.to_json()).unwrap();
        assert_eq!(v["requestId"], "req-9");
        assert_eq!(v["data"]["isSensitive"], true);
    }

    #[test]
    fn delta_and_final_messages_share_the_message_type() {
        let delta = map_engine_event(EngineEvent::MessageDelta("he".into()));
        assert_eq!(delta.kind, "message");
        assert_eq!(delta.data["streaming"], true);

        let final_msg = map_engine_event(EngineEvent::Message {
            role: "assistant".into(),
            content: "hello".into(),
        });
        assert_eq!(final_msg.kind, "message");
        assert!(final_msg.data.get("streaming").is_none());
    }

    #[test]
    fn hook_failure_maps_to_error_event() {
        let e = map_engine_event(EngineEvent::HookFailed(snow_tools::HookReport {
            command: "lint.sh".into(),
            output: String::new(),
            error: "style violations".into(),
            exit_code: 2,
        }));
        assert_eq!(e.kind, "error");
        assert_eq!(e.data["kind"], "hookFailed");
        assert_eq!(e.data["exitCode"], 2);
    }

    #[test]
    fn tool_result_carries_error_flag() {
        let e = map_engine_event(EngineEvent::ToolResult {
            call_id: "c".into(),
            tool_name: "terminal-execute".into(),
            content: "rejected".into(),
            is_error: true,
        });
        assert_eq!(e.kind, "tool_result");
        assert_eq!(e.data["isError"], true);
    }
}
