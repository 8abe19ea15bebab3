// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Stream accumulation for one model turn.
//!
//! Consumes a (retry-wrapped) provider stream and folds it into the turn's
//! text, thinking block, and finalized tool calls.  A `RetryStatus` marker
//! voids everything accumulated so far — the wrapper re-streams the whole
//! attempt — which is what makes retried streams observationally identical
//! to clean ones.

use snow_model::{StreamError, StreamEvent, ToolCallAssembler, ToolCallRecord};
use tracing::warn;

/// Everything one model turn produced.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub text: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Set when the stream failed; `text` holds whatever streamed before.
    pub error: Option<StreamError>,
}

impl TurnOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Drain `stream` to completion, invoking `on_event` for every event (UI
/// forwarding) while accumulating the outcome.
pub async fn accumulate_stream<F>(
    mut stream: snow_model::ResponseStream,
    mut on_event: F,
) -> TurnOutcome
where
    F: FnMut(&StreamEvent),
{
    use futures::StreamExt;

    let mut text = String::new();
    let mut thinking_buf = String::new();
    let mut done_thinking: Option<String> = None;
    let mut assembler = ToolCallAssembler::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                match &event {
                    StreamEvent::Content(delta) => text.push_str(delta),
                    StreamEvent::ReasoningDelta(delta) => thinking_buf.push_str(delta),
                    StreamEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments,
                    } => assembler.push_delta(*index, id, name, arguments),
                    StreamEvent::ToolCalls(calls) => assembler.push_complete(calls.clone()),
                    StreamEvent::RetryStatus { .. } => {
                        // The failed attempt is void; the wrapper re-streams.
                        text.clear();
                        thinking_buf.clear();
                        done_thinking = None;
                        assembler = ToolCallAssembler::new();
                    }
                    StreamEvent::Done { thinking } => {
                        done_thinking = thinking.clone();
                    }
                    StreamEvent::Usage { .. } => {}
                }
                on_event(&event);
            }
            Err(e) => {
                return TurnOutcome {
                    text,
                    thinking: pick_thinking(done_thinking, thinking_buf),
                    tool_calls: Vec::new(),
                    error: Some(e),
                };
            }
        }
    }

    let mut tool_calls = assembler.finish();
    if let Err(protocol_err) = repair_call_arguments(&mut tool_calls) {
        return TurnOutcome {
            text,
            thinking: pick_thinking(done_thinking, thinking_buf),
            tool_calls: Vec::new(),
            error: Some(protocol_err),
        };
    }

    TurnOutcome {
        text,
        thinking: pick_thinking(done_thinking, thinking_buf),
        tool_calls,
        error: None,
    }
}

fn pick_thinking(from_done: Option<String>, buffered: String) -> Option<String> {
    from_done.or(if buffered.is_empty() {
        None
    } else {
        Some(buffered)
    })
}

/// Validate every call's JSON arguments, applying one fix pass to malformed
/// payloads.  Arguments that survive neither parse nor repair are a
/// permanent protocol error — the turn aborts rather than dispatching a
/// call the model never meant.
fn repair_call_arguments(calls: &mut [ToolCallRecord]) -> Result<(), StreamError> {
    for call in calls.iter_mut() {
        if serde_json::from_str::<serde_json::Value>(&call.arguments).is_ok() {
            continue;
        }
        let fixed = fix_invalid_json_escapes(&call.arguments);
        let repaired = if serde_json::from_str::<serde_json::Value>(&fixed).is_ok() {
            Some(fixed)
        } else {
            close_truncated_json(&fixed)
                .filter(|c| serde_json::from_str::<serde_json::Value>(c).is_ok())
        };
        match repaired {
            Some(r) => {
                warn!(tool = %call.name, "repaired malformed tool-call JSON");
                call.arguments = r;
            }
            None => {
                return Err(StreamError::Protocol(format!(
                    "tool call '{}' carries unparseable JSON arguments",
                    call.name
                )))
            }
        }
    }
    Ok(())
}

/// Escape invalid JSON escape sequences inside string values (`\c`, `\(` …)
/// so the payload round-trips through serde_json.
fn fix_invalid_json_escapes(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 16);
    let mut chars = input.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

/// Close an abruptly truncated object: balance the trailing quote and brace.
fn close_truncated_json(input: &str) -> Option<String> {
    let trimmed = input.trim_end();
    if trimmed.ends_with('}') {
        return None;
    }
    let mut out = trimmed.to_string();
    let quotes = trimmed.chars().filter(|&c| c == '"').count();
    if quotes % 2 == 1 {
        out.push('"');
    }
    out.push('}');
    Some(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
